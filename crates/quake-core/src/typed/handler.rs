//! DynTask - Task の型消去
//!
//! worker は受け取った `TaskCall` の名前でしか task を知らない。
//! `TypedTask<T>` が具体的な `Task` を object-safe な `DynTask` に適合させ、
//! registry はすべての task を `Arc<dyn DynTask>` で保持できる。
//!
//! # 学習ポイント
//! - Type erasure パターン（`TypedTask<T>` → `DynTask`）

use std::sync::Arc;

use crate::app::safe_call::safely_call_enveloped;
use crate::domain::{Envelope, TaskCall};
use crate::error::ParallelError;

use super::task::Task;

/// Object-safe view of a task: enveloped call in, enveloped `TaskResult` out.
pub trait DynTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the call safely. Task failures are inside the returned envelope;
    /// `Err` means not even a failure result could be encoded.
    fn call(&self, call: &TaskCall) -> Result<Envelope, ParallelError>;
}

pub struct TypedTask<T: Task> {
    task: Arc<T>,
}

impl<T: Task> TypedTask<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self { task }
    }
}

impl<T: Task> DynTask for TypedTask<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn call(&self, call: &TaskCall) -> Result<Envelope, ParallelError> {
        safely_call_enveloped(self.task.as_ref(), call)
    }
}
