//! WorkerBackend port - envelope 化された task 呼び出しを実行するもの
//!
//! task manager は backend を直接触らず `WorkerPool` を経由する。pool は
//! 世代ごとに一つの backend を持つ。
//!
//! # 実装
//! - `ProcessBackend`: 子プロセス、stdin/stdout 上の frame
//! - `ThreadBackend`: 現在のプロセス内の blocking スレッド

use async_trait::async_trait;

use crate::domain::{Envelope, TaskCall};
use crate::error::ParallelError;

#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Run one call and return the enveloped `TaskResult`.
    ///
    /// Task failures are inside the envelope. `Err` is reserved for the
    /// transport: a lost worker, a backend that was shut down, a broken frame.
    async fn execute(&self, call: TaskCall) -> Result<Envelope, ParallelError>;

    /// Number of calls that can run at the same time.
    fn workers(&self) -> usize;

    /// Stop accepting calls and wait for the running ones to finish.
    /// Calls still queued fail.
    async fn shutdown(&self);
}
