use thiserror::Error;

use crate::domain::PoolId;

#[derive(Debug, Error)]
pub enum ParallelError {
    /// A value could not cross the process boundary.
    #[error("serialization of {type_name} failed: {source}")]
    Serialization {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The task itself failed; the message carries the captured trace.
    #[error("{0}")]
    TaskFailure(String),

    #[error(
        "Using more memory than allowed by configuration (Used: {used:.0}% / Allowed: {allowed:.0}%)! Shutting down."
    )]
    ResourceExhausted { used: f64, allowed: f64 },

    /// The result was produced by a worker pool generation that has been replaced.
    #[error("result of pool generation {found} is stale (current: {current})")]
    PoolGeneration { found: PoolId, current: String },

    #[error("worker {slot} lost while running {task}: {detail}")]
    WorkerLost {
        slot: usize,
        task: String,
        detail: String,
    },

    #[error("task {0} is not registered")]
    UnknownTask(String),

    #[error("task {0} is already registered")]
    DuplicateTask(String),

    #[error("invalid weight {weight} for item #{index}")]
    InvalidWeight { index: usize, weight: f64 },

    #[error("Monitor({operation:?}).flush() must not be called by {task}!")]
    FlushForbidden { operation: String, task: String },

    #[error("worker protocol: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ParallelError {
    /// Short name of the error kind, used as `TaskError::kind` when a
    /// framework failure has to be reported as a task result.
    pub fn kind(&self) -> &'static str {
        match self {
            ParallelError::Serialization { .. } => "SerializationError",
            ParallelError::TaskFailure(_) => "TaskFailure",
            ParallelError::ResourceExhausted { .. } => "ResourceExhausted",
            ParallelError::PoolGeneration { .. } => "PoolGenerationError",
            ParallelError::WorkerLost { .. } => "WorkerLost",
            ParallelError::UnknownTask(_) => "UnknownTask",
            ParallelError::DuplicateTask(_) => "DuplicateTask",
            ParallelError::InvalidWeight { .. } => "InvalidWeight",
            ParallelError::FlushForbidden { .. } => "FlushForbidden",
            ParallelError::Protocol(_) => "ProtocolError",
            ParallelError::Io(_) => "IoError",
        }
    }
}
