//! WorkerPool - 常に一世代だけの worker backend を持つ pool
//!
//! # ライフサイクル
//! - `new` は何も起動しない。最初の `dispatch` で世代を開始
//! - `restart` は新しい世代を据えてから古い世代を shutdown
//! - `shutdown` は現在の世代を止める。次の dispatch で新しい世代が始まる
//!
//! dispatch した呼び出しには受け取った世代のタグが付くので、task manager は
//! restart をまたいだ結果を拒否できる。

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::{BackendKind, ParallelConfig};
use crate::domain::{Envelope, PoolId, TaskCall};
use crate::error::ParallelError;
use crate::impls::{ProcessBackend, ThreadBackend};
use crate::ports::WorkerBackend;
use crate::typed::TaskRegistry;

pub type ResultFuture = Pin<Box<dyn Future<Output = Result<Envelope, ParallelError>> + Send>>;

/// A call handed to the pool: the generation it went to and its pending result.
pub struct Dispatched {
    pub generation: PoolId,
    pub result: ResultFuture,
}

#[derive(Clone)]
struct Generation {
    id: PoolId,
    backend: Arc<dyn WorkerBackend>,
}

pub struct WorkerPool {
    config: ParallelConfig,
    registry: Arc<TaskRegistry>,
    current: Mutex<Option<Generation>>,
}

impl WorkerPool {
    /// `registry` serves the thread backend; worker processes build their own.
    pub fn new(config: &ParallelConfig, registry: Arc<TaskRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            registry,
            current: Mutex::new(None),
        })
    }

    pub fn workers(&self) -> usize {
        self.config.num_workers.max(1)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.config.backend
    }

    /// The running generation, `None` before the first dispatch or after shutdown.
    pub fn generation(&self) -> Option<PoolId> {
        self.lock().as_ref().map(|g| g.id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Generation>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_generation(&self) -> Result<Generation, ParallelError> {
        let id = PoolId::generate();
        let workers = self.workers();
        let backend: Arc<dyn WorkerBackend> = match self.config.backend {
            BackendKind::Processes => Arc::new(ProcessBackend::start(
                id,
                self.config.worker_command()?,
                workers,
            )),
            BackendKind::Threads => {
                Arc::new(ThreadBackend::new(id, Arc::clone(&self.registry), workers))
            }
        };
        info!(generation = %id, workers, backend = ?self.config.backend, "starting worker pool");
        Ok(Generation { id, backend })
    }

    /// Queue `call` on the current generation, starting one if needed.
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, call: TaskCall) -> Result<Dispatched, ParallelError> {
        let generation = {
            let mut current = self.lock();
            match current.as_ref() {
                Some(generation) => generation.clone(),
                None => {
                    let generation = self.start_generation()?;
                    *current = Some(generation.clone());
                    generation
                }
            }
        };
        let backend = generation.backend;
        Ok(Dispatched {
            generation: generation.id,
            result: Box::pin(async move { backend.execute(call).await }),
        })
    }

    /// Replace the current generation with a new one and return its id.
    /// Calls still queued on the old generation fail with `PoolGeneration`.
    pub async fn restart(&self) -> Result<PoolId, ParallelError> {
        let next = self.start_generation()?;
        let id = next.id;
        let previous = self.lock().replace(next);
        if let Some(previous) = previous {
            debug!(old = %previous.id, new = %id, "restarting worker pool");
            previous.backend.shutdown().await;
        }
        Ok(id)
    }

    pub async fn shutdown(&self) {
        let previous = self.lock().take();
        if let Some(previous) = previous {
            info!(generation = %previous.id, "shutting down worker pool");
            previous.backend.shutdown().await;
        }
    }
}
