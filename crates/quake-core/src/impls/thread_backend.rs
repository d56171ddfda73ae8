//! ThreadBackend - 現在のプロセスの blocking スレッドで呼び出しを実行
//!
//! 呼び出しは worker プロセスと同じく envelope で運ばれ registry を通る。
//! 違いはプロセス境界がないことだけ。テストや、自分自身を再実行できない
//! ホスト向け。
//!
//! # 実装メモ
//! - worker 数ぶんの permit を持つ `Semaphore` で並行数を制限
//! - 実処理は `spawn_blocking` で実行（task は CPU bound）

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::{Envelope, PoolId, TaskCall};
use crate::error::ParallelError;
use crate::ports::WorkerBackend;
use crate::typed::TaskRegistry;

pub struct ThreadBackend {
    generation: PoolId,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    workers: usize,
    closed: AtomicBool,
}

impl ThreadBackend {
    pub fn new(generation: PoolId, registry: Arc<TaskRegistry>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            generation,
            registry,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            closed: AtomicBool::new(false),
        }
    }

    fn closed_error(&self) -> ParallelError {
        ParallelError::PoolGeneration {
            found: self.generation,
            current: "shut down".to_string(),
        }
    }
}

#[async_trait]
impl WorkerBackend for ThreadBackend {
    async fn execute(&self, call: TaskCall) -> Result<Envelope, ParallelError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let registry = Arc::clone(&self.registry);
        let task = call.task.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            registry.call(&call)
        })
        .await
        .map_err(|e| ParallelError::WorkerLost {
            slot: 0,
            task,
            detail: e.to_string(),
        })?
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // queued calls get their permit, see `closed` and leave; running ones
        // finish and release theirs
        if let Ok(all) = self.permits.acquire_many(self.workers as u32).await {
            all.forget();
        }
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Monitor, TaskResult};
    use crate::typed::task::testing::SumTask;
    use std::time::Duration;

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry.register(SumTask).unwrap();
        Arc::new(registry)
    }

    fn sum_call(items: &[u64]) -> TaskCall {
        TaskCall::new(
            "test.sum.v1",
            Envelope::wrap(items).unwrap(),
            Envelope::wrap(&1u64).unwrap(),
            Envelope::wrap(&Monitor::new("sum")).unwrap(),
        )
    }

    #[tokio::test]
    async fn executes_through_the_registry() {
        let backend = ThreadBackend::new(PoolId::generate(), registry(), 2);
        let envelope = backend.execute(sum_call(&[1, 2, 3])).await.unwrap();
        let result: TaskResult<u64> = envelope.unwrap().unwrap();
        assert_eq!(result.outcome.unwrap(), 6);
    }

    #[tokio::test]
    async fn runs_calls_concurrently() {
        let backend = Arc::new(ThreadBackend::new(PoolId::generate(), registry(), 4));
        let mut handles = Vec::new();
        for i in 0..8u64 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move { backend.execute(sum_call(&[i])).await }));
        }
        let mut total = 0;
        for handle in handles {
            let result: TaskResult<u64> = handle.await.unwrap().unwrap().unwrap().unwrap();
            total += result.outcome.unwrap();
        }
        assert_eq!(total, 28);
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail_with_generation_error() {
        let backend = ThreadBackend::new(PoolId::generate(), registry(), 1);
        tokio::time::timeout(Duration::from_secs(5), backend.shutdown())
            .await
            .unwrap();

        let err = backend.execute(sum_call(&[1])).await.unwrap_err();
        assert!(matches!(err, ParallelError::PoolGeneration { .. }));
    }
}
