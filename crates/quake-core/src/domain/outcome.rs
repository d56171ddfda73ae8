//! Outcome - task 呼び出しが境界をまたいで返すもの
//!
//! task は失敗を worker の外に漏らさない。safe call 層が失敗を `TaskError`
//! に変換し、実行を計測した monitor と一緒にデータとして返す。

use serde::{Deserialize, Serialize};

use super::monitor::Monitor;
use crate::error::ParallelError;

/// A captured task failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Short name of the failure, e.g. the error type or `panic`.
    pub kind: String,
    /// Human readable message with the error chain.
    pub message: String,
    /// Where the failure happened: panic location and stack backtrace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Capture a `std::error::Error` and all of its sources.
    pub fn from_error<E: std::error::Error + ?Sized>(kind: impl Into<String>, err: &E) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str("\n  caused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(kind, message)
    }

    /// Report a framework error (bad envelope, unknown task, ...) as a task failure.
    pub fn from_parallel(err: &ParallelError) -> Self {
        Self::from_error(err.kind(), err)
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(traceback) = &self.traceback {
            write!(f, "\n{traceback}")?;
        }
        Ok(())
    }
}

/// Result of one task invocation: either a value or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult<O> {
    pub outcome: Result<O, TaskError>,
    pub monitor: Monitor,
}

impl<O> TaskResult<O> {
    pub fn success(value: O, monitor: Monitor) -> Self {
        Self {
            outcome: Ok(value),
            monitor,
        }
    }

    pub fn failure(error: TaskError, monitor: Monitor) -> Self {
        Self {
            outcome: Err(error),
            monitor,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Split into the value (or the failure, as a `TaskFailure` error) and the monitor.
    pub fn into_parts(self) -> (Result<O, ParallelError>, Monitor) {
        let outcome = self
            .outcome
            .map_err(|e| ParallelError::TaskFailure(e.to_string()));
        (outcome, self.monitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("cannot read site model")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn error_chain_is_captured() {
        let err = Outer(std::io::Error::other("file truncated"));
        let captured = TaskError::from_error("Outer", &err);
        assert_eq!(
            captured.message,
            "cannot read site model\n  caused by: file truncated"
        );
        assert_eq!(captured.to_string(), format!("Outer: {}", captured.message));
    }

    #[test]
    fn traceback_is_part_of_the_failure_text() {
        let captured = TaskError::new("panic", "boom").with_traceback("at src/sites.rs:10:5");
        let result: TaskResult<u8> = TaskResult::failure(captured, Monitor::new("sites"));

        let json = serde_json::to_string(&result).unwrap();
        let back: TaskResult<u8> = serde_json::from_str(&json).unwrap();
        let (outcome, _) = back.into_parts();
        match outcome {
            Err(ParallelError::TaskFailure(text)) => {
                assert_eq!(text, "panic: boom\nat src/sites.rs:10:5");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // no traceback, no extra line and no field on the wire
        assert_eq!(TaskError::new("Io", "gone").to_string(), "Io: gone");
        let plain = serde_json::to_value(TaskError::new("Io", "gone")).unwrap();
        assert!(plain.get("traceback").is_none());
    }

    #[test]
    fn failure_result_deserializes_as_any_output_type() {
        let result: TaskResult<()> = TaskResult::failure(
            TaskError::new("UnknownTask", "task x is not registered"),
            Monitor::new("x"),
        );
        let json = serde_json::to_string(&result).unwrap();

        let back: TaskResult<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert!(!back.is_success());
        let (outcome, monitor) = back.into_parts();
        assert!(matches!(outcome, Err(ParallelError::TaskFailure(m)) if m.contains("not registered")));
        assert_eq!(monitor.operation(), "x");
    }

    #[test]
    fn result_with_a_broken_monitor_is_an_error() {
        let json = r#"{"outcome": {"Ok": 1}, "monitor": {"nodes": []}}"#;
        let err = serde_json::from_str::<TaskResult<u64>>(json).unwrap_err();
        assert!(err.to_string().contains("monitor without a root node"), "{err}");
    }

    #[test]
    fn success_roundtrip() {
        let result = TaskResult::success(vec![0.1, 0.2], Monitor::new("curves"));
        let json = serde_json::to_string(&result).unwrap();
        let back: TaskResult<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome.unwrap(), vec![0.1, 0.2]);
    }
}
