//! Safe call - 失敗を一切外に漏らさずに task を実行
//!
//! Err の戻り値も panic も、返される `TaskResult` の中の `TaskError` に
//! 変換される。worker は失敗した task の後も serve を続け、呼び出し側は
//! 結果を消費したときに初めて失敗を知る。
//!
//! # 学習ポイント
//! - `catch_unwind` と `AssertUnwindSafe`
//! - thread-local とプロセス全体の panic hook で panic の位置と
//!   backtrace を記録する

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::domain::{Envelope, Monitor, TaskCall, TaskError, TaskResult};
use crate::error::ParallelError;
use crate::typed::Task;

thread_local! {
    /// Set while this thread runs a task under `safely_call`.
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    /// Location and backtrace of the last panic caught on this thread.
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install, once per process, a hook that records where a task panicked.
/// Panics outside `safely_call` go to the previous hook as before.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !CAPTURING.with(Cell::get) {
                previous(info);
                return;
            }
            let location = info.location().map_or_else(
                || "unknown location".to_string(),
                |l| format!("{}:{}:{}", l.file(), l.line(), l.column()),
            );
            let trace = format!(
                "panicked at {location}\nstack backtrace:\n{}",
                Backtrace::force_capture()
            );
            LAST_PANIC.with(|last| *last.borrow_mut() = Some(trace));
        }));
    });
}

/// Run `f` with panic capture enabled on this thread.
fn catch_task_panic<R>(f: impl FnOnce() -> R) -> Result<R, (Box<dyn Any + Send>, Option<String>)> {
    install_panic_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let caught = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(was_capturing));
    caught.map_err(|payload| (payload, LAST_PANIC.with(|last| last.borrow_mut().take())))
}

/// Run `task` on one chunk, measuring it as `total <task name>`.
pub fn safely_call<T: Task>(
    task: &T,
    items: Vec<T::Item>,
    args: &T::Args,
    mut monitor: Monitor,
) -> TaskResult<T::Output> {
    monitor.lock(T::NAME);
    let operation = format!("total {}", T::NAME);
    let caught = catch_task_panic(|| {
        monitor.time_with_memory(&operation, |m| task.run(items, args, m))
    });
    monitor.detach_transient();

    match caught {
        Ok(Ok(value)) => TaskResult::success(value, monitor),
        Ok(Err(err)) => {
            let mut error = TaskError::from_error(short_type_name::<T::Error>(), &err);
            // honours RUST_BACKTRACE; the trace ends in this function
            let trace = Backtrace::capture();
            if trace.status() == BacktraceStatus::Captured {
                error = error.with_traceback(format!("stack backtrace:\n{trace}"));
            }
            TaskResult::failure(error, monitor)
        }
        Err((payload, trace)) => {
            let mut error = TaskError::new(
                "panic",
                format!("task {} panicked: {}", T::NAME, panic_message(payload.as_ref())),
            );
            if let Some(trace) = trace {
                error = error.with_traceback(trace);
            }
            TaskResult::failure(error, monitor)
        }
    }
}

/// Enveloped variant used on the worker side: unwrap the inputs, run, and
/// wrap the result.
///
/// Inputs that cannot be decoded and outputs that cannot be encoded are
/// reported as failed results, not as errors.
pub fn safely_call_enveloped<T: Task>(task: &T, call: &TaskCall) -> Result<Envelope, ParallelError> {
    let monitor = call
        .monitor
        .unwrap::<Monitor>()
        .unwrap_or_else(|_| Monitor::new(T::NAME));

    let inputs = call
        .items
        .unwrap::<Vec<T::Item>>()
        .and_then(|items| Ok((items, call.args.unwrap::<T::Args>()?)));
    let result = match inputs {
        Ok((items, args)) => safely_call(task, items, &args, monitor),
        Err(err) => TaskResult::failure(TaskError::from_parallel(&err), monitor),
    };

    match Envelope::wrap(&result) {
        Ok(envelope) => Ok(envelope),
        Err(err) => failure_envelope(TaskError::from_parallel(&err), result.monitor),
    }
}

/// Envelope holding a failed `TaskResult`. It decodes as `TaskResult<O>` for
/// any output type `O`.
pub fn failure_envelope(error: TaskError, monitor: Monitor) -> Result<Envelope, ParallelError> {
    Envelope::wrap(&TaskResult::<()>::failure(error, monitor))
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::testing::{CheckTask, FlushingTask, PanicTask, SumTask};

    fn call_for<T: Task>(items: &[T::Item], args: &T::Args) -> TaskCall {
        TaskCall::new(
            T::NAME,
            Envelope::wrap(items).unwrap(),
            Envelope::wrap(args).unwrap(),
            Envelope::wrap(&Monitor::new(T::NAME)).unwrap(),
        )
    }

    #[test]
    fn success_carries_value_and_measurements() {
        let result = safely_call(&SumTask, vec![1, 2, 3], &10, Monitor::new("sum"));

        assert_eq!(result.outcome.unwrap(), 60);
        let total = result.monitor.find(&["total test.sum.v1"]).unwrap();
        assert_eq!(total.calls, 1);
        assert!(result.monitor.find(&["total test.sum.v1", "summing"]).is_some());
        assert!(!result.monitor.is_locked());
    }

    #[test]
    fn error_is_captured_with_its_kind() {
        let result = safely_call(&CheckTask, vec![1, -7, 3], &(), Monitor::new("check"));

        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, "BadRupture");
        assert_eq!(err.message, "rupture -7 has a negative magnitude");
    }

    #[test]
    fn panic_is_captured() {
        let result = safely_call(&PanicTask, vec![1], &(), Monitor::new("panic"));

        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, "panic");
        assert!(err.message.contains("index out of bounds in site collection"));
        let trace = err.traceback.as_deref().unwrap();
        assert!(trace.starts_with("panicked at "), "{trace}");
        assert!(trace.contains("task.rs:"), "{trace}");
        assert!(trace.contains("stack backtrace:"), "{trace}");
        // the monitor is usable again even though the task never returned
        assert!(!result.monitor.is_locked());
    }

    #[test]
    fn panic_capture_ends_with_the_call() {
        let _ = safely_call(&PanicTask, vec![1], &(), Monitor::new("panic"));
        assert!(!CAPTURING.with(Cell::get));
        assert!(LAST_PANIC.with(|last| last.borrow().is_none()));
    }

    #[test]
    fn flushing_inside_a_task_fails() {
        let result = safely_call(&FlushingTask, vec!['a', 'b'], &(), Monitor::new("test"));

        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, "ParallelError");
        assert!(err
            .message
            .contains("Monitor(\"test\").flush() must not be called by test.flush.v1!"));
        assert_eq!(result.monitor.operation(), "test");
    }

    #[test]
    fn enveloped_call_roundtrip() {
        let call = call_for::<SumTask>(&[4, 5], &2);
        let envelope = safely_call_enveloped(&SumTask, &call).unwrap();

        let result: TaskResult<u64> = envelope.unwrap().unwrap();
        assert_eq!(result.outcome.unwrap(), 18);
        assert_eq!(result.monitor.operation(), SumTask::NAME);
    }

    #[test]
    fn undecodable_items_become_a_failed_result() {
        let mut call = call_for::<SumTask>(&[1], &1);
        call.items = Envelope::wrap(&"not a list of numbers").unwrap();

        let envelope = safely_call_enveloped(&SumTask, &call).unwrap();
        let result: TaskResult<u64> = envelope.unwrap().unwrap();
        assert_eq!(result.outcome.unwrap_err().kind, "SerializationError");
    }
}
