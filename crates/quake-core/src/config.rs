//! エンジンの設定
//!
//! 設定は明示的に扱う。呼び出し側が（デフォルト値・JSON ファイル・環境変数の
//! overlay から）組み立て、コンストラクタ経由で渡す。CLI より下の層が自分で
//! 環境変数を読むことはない。

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ParallelError;

pub const NO_DISTRIBUTE_ENV: &str = "QUAKE_NO_DISTRIBUTE";
pub const NUM_WORKERS_ENV: &str = "QUAKE_NUM_WORKERS";
/// Set on worker processes; the executable serves frames instead of its normal `main`.
pub const WORKER_ENV: &str = "QUAKE_WORKER";

/// Where calls run when distribution is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Child processes of `worker_program` (default).
    #[default]
    Processes,
    /// Blocking threads of the current process.
    Threads,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Run every task in the calling process, sequentially.
    pub no_distribute: bool,
    pub num_workers: usize,
    pub backend: BackendKind,
    pub soft_memory_percent: f64,
    pub hard_memory_percent: f64,
    /// Executable launched for worker processes; the current executable when unset.
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            no_distribute: false,
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            backend: BackendKind::Processes,
            soft_memory_percent: 90.0,
            hard_memory_percent: 100.0,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl ParallelConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().overlay_env(lookup)
    }

    /// Apply `QUAKE_NO_DISTRIBUTE` / `QUAKE_NUM_WORKERS` on top of `self`.
    pub fn overlay_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(NO_DISTRIBUTE_ENV) {
            self.no_distribute = is_truthy(&value);
        }
        if let Some(n) = lookup(NUM_WORKERS_ENV).and_then(|v| v.trim().parse::<usize>().ok()) {
            if n > 0 {
                self.num_workers = n;
            }
        }
        self
    }

    /// Load a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ParallelError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| ParallelError::Serialization {
            type_name: std::any::type_name::<Self>().to_string(),
            source,
        })
    }

    pub fn with_no_distribute(mut self, no_distribute: bool) -> Self {
        self.no_distribute = no_distribute;
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_memory_limits(mut self, soft: f64, hard: f64) -> Self {
        self.soft_memory_percent = soft;
        self.hard_memory_percent = hard;
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.worker_program = Some(program.into());
        self.worker_args = args;
        self
    }

    /// Default number of chunks to split a job into.
    pub fn task_hint(&self) -> usize {
        self.num_workers.max(1) * 8
    }

    /// Resolve the command used to launch worker processes.
    pub fn worker_command(&self) -> Result<WorkerCommand, ParallelError> {
        let program = match &self.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(WorkerCommand {
            program,
            args: self.worker_args.clone(),
        })
    }
}

/// Program and arguments of a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
