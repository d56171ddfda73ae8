//! `quake` バイナリに同梱する task
//!
//! バイナリは worker 実行ファイルも兼ねるので、親も worker も同じ
//! `registry()` から registry を組み立てる。

use std::convert::Infallible;

use quake_core::app::is_worker_process;
use quake_core::domain::{AccumDict, Monitor};
use quake_core::error::ParallelError;
use quake_core::typed::{Task, TaskRegistry};

/// Items times a factor, summed.
pub struct SumTask;

impl Task for SumTask {
    const NAME: &'static str = "quake.sum.v1";
    type Item = u64;
    type Args = u64;
    type Output = u64;
    type Error = Infallible;

    fn run(&self, items: Vec<u64>, factor: &u64, monitor: &mut Monitor) -> Result<u64, Infallible> {
        Ok(monitor.time("sum items", |_| items.iter().map(|i| i * factor).sum()))
    }
}

/// Counts items by parity.
pub struct CountTask;

impl Task for CountTask {
    const NAME: &'static str = "quake.count.v1";
    type Item = u64;
    type Args = ();
    type Output = AccumDict<String, u64>;
    type Error = Infallible;

    fn run(
        &self,
        items: Vec<u64>,
        _: &(),
        monitor: &mut Monitor,
    ) -> Result<AccumDict<String, u64>, Infallible> {
        Ok(monitor.time("count items", |_| {
            items
                .iter()
                .map(|i| {
                    let parity = if i % 2 == 0 { "even" } else { "odd" };
                    (parity.to_string(), 1)
                })
                .collect()
        }))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("item {item} is a multiple of {divisor}")]
pub struct RejectedItem {
    pub item: u64,
    pub divisor: u64,
}

/// Fails on the first item divisible by the argument.
pub struct FailTask;

impl Task for FailTask {
    const NAME: &'static str = "quake.fail.v1";
    type Item = u64;
    type Args = u64;
    type Output = usize;
    type Error = RejectedItem;

    fn run(&self, items: Vec<u64>, divisor: &u64, _: &mut Monitor) -> Result<usize, RejectedItem> {
        let divisor = (*divisor).max(1);
        match items.iter().find(|&&i| i % divisor == 0) {
            Some(&item) => Err(RejectedItem { item, divisor }),
            None => Ok(items.len()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refusing to exit a process that is not a worker")]
pub struct NotAWorker;

/// Exits the worker process with the given code.
pub struct CrashTask;

impl Task for CrashTask {
    const NAME: &'static str = "quake.crash.v1";
    type Item = u64;
    type Args = i32;
    type Output = ();
    type Error = NotAWorker;

    fn run(&self, _: Vec<u64>, code: &i32, _: &mut Monitor) -> Result<(), NotAWorker> {
        if !is_worker_process() {
            return Err(NotAWorker);
        }
        std::process::exit(*code)
    }
}

pub fn registry() -> Result<TaskRegistry, ParallelError> {
    let mut registry = TaskRegistry::new();
    registry.register(SumTask)?;
    registry.register(CountTask)?;
    registry.register(FailTask)?;
    registry.register(CrashTask)?;
    Ok(registry)
}
