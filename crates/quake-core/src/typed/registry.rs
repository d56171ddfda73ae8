//! TaskRegistry - task 名 → 型消去された task
//!
//! 初期化時に一度だけ構築し、その後は不変のまま共有する（親ではスレッド
//! backend が、各 worker プロセスでは serve ループが使う）。
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::safe_call::failure_envelope;
use crate::domain::{Envelope, Monitor, TaskCall, TaskError};
use crate::error::ParallelError;

use super::handler::{DynTask, TypedTask};
use super::task::Task;

#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn DynTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn register<T: Task>(&mut self, task: T) -> Result<(), ParallelError> {
        self.register_shared(Arc::new(task))
    }

    pub fn register_shared<T: Task>(&mut self, task: Arc<T>) -> Result<(), ParallelError> {
        if self.tasks.contains_key(T::NAME) {
            return Err(ParallelError::DuplicateTask(T::NAME.to_string()));
        }
        self.tasks
            .insert(T::NAME.to_string(), Arc::new(TypedTask::new(task)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynTask>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a call by task name. An unknown name yields a failed result
    /// rather than an error, so the caller sees it at `reduce` time like any
    /// other task failure.
    pub fn call(&self, call: &TaskCall) -> Result<Envelope, ParallelError> {
        match self.tasks.get(&call.task) {
            Some(task) => task.call(call),
            None => {
                let monitor = call
                    .monitor
                    .unwrap::<Monitor>()
                    .unwrap_or_else(|_| Monitor::new(call.task.clone()));
                let error = ParallelError::UnknownTask(call.task.clone());
                failure_envelope(TaskError::from_parallel(&error), monitor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskResult;
    use crate::typed::task::testing::{CheckTask, SumTask};

    #[test]
    fn register_and_get() {
        let mut registry = TaskRegistry::new();
        registry.register(SumTask).unwrap();

        assert!(registry.get(SumTask::NAME).is_some());
        assert!(registry.contains("test.sum.v1"));
        assert!(registry.get(CheckTask::NAME).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register(SumTask).unwrap();
        let result = registry.register(SumTask);
        assert!(matches!(result, Err(ParallelError::DuplicateTask(name)) if name == SumTask::NAME));
    }

    #[test]
    fn registered_names_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register(SumTask).unwrap();
        registry.register(CheckTask).unwrap();
        assert_eq!(
            registry.registered_names(),
            vec!["test.check.v1".to_string(), "test.sum.v1".to_string()]
        );
    }

    #[test]
    fn unknown_task_becomes_a_failed_result() {
        let registry = TaskRegistry::new();
        let call = TaskCall::new(
            "missing.v1",
            Envelope::wrap(&Vec::<u64>::new()).unwrap(),
            Envelope::wrap(&()).unwrap(),
            Envelope::wrap(&Monitor::new("missing")).unwrap(),
        );

        let envelope = registry.call(&call).unwrap();
        let result: TaskResult<u64> = envelope.unwrap().unwrap();
        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, "UnknownTask");
        assert!(err.message.contains("missing.v1"));
    }
}
