//! End-to-end runs on real worker processes: the `quake` binary built by
//! cargo serves as the worker executable.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use quake_cli::tasks::{self, CrashTask, FailTask, SumTask};
use quake_core::app::{TaskManager, WorkerPool};
use quake_core::config::{BackendKind, ParallelConfig};
use quake_core::domain::BlockSplitter;
use quake_core::error::ParallelError;

const QUAKE: &str = env!("CARGO_BIN_EXE_quake");

fn config(workers: usize) -> ParallelConfig {
    ParallelConfig::default()
        .with_backend(BackendKind::Processes)
        .with_workers(workers)
        .with_no_distribute(false)
        .with_worker_program(QUAKE, Vec::new())
}

fn pool(config: &ParallelConfig) -> Arc<WorkerPool> {
    WorkerPool::new(config, Arc::new(tasks::registry().unwrap()))
}

#[tokio::test]
async fn concurrency_does_not_change_the_sum() {
    let config = config(3);
    let pool = pool(&config);
    let items: Vec<u64> = (1..=500).collect();

    let mut totals = Vec::new();
    for hint in [1, 4, 9] {
        let mut manager = TaskManager::new(SumTask, Arc::clone(&pool), &config);
        let total = manager
            .apply_reduce(items.clone(), &3, &BlockSplitter::new(hint), |a, b| a + b, 0u64)
            .await
            .unwrap();
        assert!(manager.sent() > 0);
        assert!(manager.received() > 0);
        totals.push(total);
    }

    assert_eq!(totals, vec![375_750; 3]);
    pool.shutdown().await;
}

#[tokio::test]
async fn task_failure_comes_back_from_the_worker() {
    let config = config(2);
    let pool = pool(&config);
    let mut manager = TaskManager::new(FailTask, Arc::clone(&pool), &config);

    let err = manager
        .apply_reduce((1..=40).collect(), &13, &BlockSplitter::new(4), |a, b| a + b, 0usize)
        .await
        .unwrap_err();

    match err {
        ParallelError::TaskFailure(message) => {
            assert!(message.contains("RejectedItem"), "{message}");
            assert!(message.contains("is a multiple of 13"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // the workers survived the failure
    let mut manager = TaskManager::new(SumTask, Arc::clone(&pool), &config);
    let total = manager
        .apply_reduce(vec![1, 2, 3], &1, &BlockSplitter::new(2), |a, b| a + b, 0u64)
        .await
        .unwrap();
    assert_eq!(total, 6);
    pool.shutdown().await;
}

#[tokio::test]
async fn crashed_worker_is_reported_and_replaced() {
    let config = config(1);
    let pool = pool(&config);

    let mut manager = TaskManager::new(CrashTask, Arc::clone(&pool), &config);
    manager.submit(vec![1], &3).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(30), manager.wait())
        .await
        .expect("a crashed worker must not hang reduce")
        .unwrap_err();
    assert!(matches!(err, ParallelError::WorkerLost { .. }), "{err}");

    let mut manager = TaskManager::new(SumTask, Arc::clone(&pool), &config);
    manager.submit(vec![4, 5], &1).unwrap();
    assert_eq!(manager.reduce(|a, b| a + b, 0u64).await.unwrap(), 9);
    pool.shutdown().await;
}

#[test]
fn run_command_prints_the_result() {
    let output = Command::new(QUAKE)
        .args(["run", "--task", "sum", "--items", "100", "--concurrency", "4", "--workers", "2"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["result"], serde_json::json!(5050));
    assert_eq!(report["stats"]["distributed"], serde_json::json!(true));
}

#[test]
fn chunks_command_keeps_keys_together() {
    let output = Command::new(QUAKE)
        .args(["chunks", "--items", "aaabb", "--hint", "0", "--by-key"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let chunks: Vec<Vec<char>> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(chunks, vec![vec!['a', 'a', 'a'], vec!['b', 'b']]);
}

#[test]
fn failing_run_exits_with_an_error() {
    let output = Command::new(QUAKE)
        .args(["run", "--task", "fail", "--items", "20", "--no-distribute"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is a multiple of 7"), "{stderr}");
}
