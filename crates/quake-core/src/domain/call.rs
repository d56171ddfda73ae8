//! Wire messages between the task manager and a worker.

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use super::ids::CallId;

/// One task invocation: the registered task name plus its enveloped inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCall {
    pub call_id: CallId,
    pub task: String,
    pub items: Envelope,
    pub args: Envelope,
    pub monitor: Envelope,
}

impl TaskCall {
    pub fn new(task: impl Into<String>, items: Envelope, args: Envelope, monitor: Envelope) -> Self {
        Self {
            call_id: CallId::generate(),
            task: task.into(),
            items,
            args,
            monitor,
        }
    }

    /// Bytes shipped to the worker for this call.
    pub fn transfer_size(&self) -> usize {
        self.items.len() + self.args.len() + self.monitor.len()
    }
}

/// Reply to a [`TaskCall`]; `result` is an enveloped `TaskResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub call_id: CallId,
    pub result: Envelope,
}
