//! EngineBuilder - task registry・設定・pool の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン（`with_*` / `register` のチェーン）
//! - 起動時検証（Fail-fast 設計）
//!
//! # Fail-fast 設計
//! - `expect_tasks()` でアプリケーションが前提とする task 名を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `BuildError::MissingTasks` を返す

use std::sync::Arc;

use crate::config::ParallelConfig;
use crate::error::ParallelError;
use crate::typed::{Task, TaskRegistry};

use super::manager::TaskManager;
use super::pool::WorkerPool;

/// EngineBuilder は [`Engine`] を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .config(ParallelConfig::from_env())
///     .register(HazardTask)?
///     .expect_tasks(&[HazardTask::NAME])
///     .build()?;
/// ```
pub struct EngineBuilder {
    registry: TaskRegistry,
    config: ParallelConfig,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing tasks: {0:?}. These tasks were expected but not registered.")]
    MissingTasks(Vec<String>),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            config: ParallelConfig::default(),
            expected_tasks: None,
        }
    }

    pub fn config(mut self, config: ParallelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<T: Task>(mut self, task: T) -> Result<Self, ParallelError> {
        self.registry.register(task)?;
        Ok(self)
    }

    /// Start from an already populated registry, e.g. one shared with workers.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTasks(missing));
            }
        }
        let registry = Arc::new(self.registry);
        let pool = WorkerPool::new(&self.config, Arc::clone(&registry));
        Ok(Engine {
            registry,
            pool,
            config: self.config,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 一つのアプリケーションの registry・設定・pool
///
/// worker プロセスも同じ engine を組み立てて `registry` を serve し、
/// 親は task manager 経由で `pool` を使う。
pub struct Engine {
    pub registry: Arc<TaskRegistry>,
    pub pool: Arc<WorkerPool>,
    pub config: ParallelConfig,
}

impl Engine {
    pub fn manager<T: Task>(&self, task: T) -> TaskManager<T> {
        TaskManager::new(task, Arc::clone(&self.pool), &self.config)
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::domain::BlockSplitter;
    use crate::typed::task::testing::{CheckTask, SumTask};

    #[test]
    fn build_success() {
        let engine = EngineBuilder::new()
            .register(SumTask)
            .unwrap()
            .expect_tasks(&[SumTask::NAME])
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn build_missing_tasks() {
        let engine = EngineBuilder::new()
            .register(SumTask)
            .unwrap()
            .expect_tasks(&[SumTask::NAME, CheckTask::NAME])
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::MissingTasks(missing)) if missing == vec![CheckTask::NAME.to_string()]
        ));
    }

    #[test]
    fn build_without_expectations() {
        let engine = EngineBuilder::new().build().unwrap();
        assert!(engine.registry.registered_names().is_empty());
        assert_eq!(engine.pool.generation(), None);
    }

    #[tokio::test]
    async fn engine_managers_share_the_pool() {
        let config = ParallelConfig::default()
            .with_backend(BackendKind::Threads)
            .with_workers(2);
        let engine = EngineBuilder::new()
            .config(config)
            .register(SumTask)
            .unwrap()
            .build()
            .unwrap();

        let mut manager = engine.manager(SumTask);
        let total = manager
            .apply_reduce((1..=6).collect(), &1, &BlockSplitter::new(2), |a, b| a + b, 0u64)
            .await
            .unwrap();
        assert_eq!(total, 21);
        assert!(engine.pool.generation().is_some());
        engine.shutdown().await;
    }
}
