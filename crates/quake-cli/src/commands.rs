//! Subcommand implementations.

use anyhow::Context;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use quake_core::app::{EngineBuilder, TaskManager};
use quake_core::config::{BackendKind, ParallelConfig};
use quake_core::domain::{AccumDict, BlockSplitter, Chunk};
use quake_core::error::ParallelError;
use quake_core::observability::TransferStats;
use quake_core::typed::Task;

use crate::cli::{Commands, RunArgs, TaskKind};
use crate::tasks::{self, CountTask, FailTask, SumTask};

pub async fn execute(command: Commands) -> anyhow::Result<()> {
    let output = match command {
        Commands::Run(args) => run(&args).await?,
        Commands::Chunks {
            items,
            hint,
            by_key,
        } => serde_json::to_value(chunks(&items, hint, by_key)?)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Defaults or `--config`, then the environment, then the flags.
pub fn load_config(args: &RunArgs) -> anyhow::Result<ParallelConfig> {
    let base = match &args.config {
        Some(path) => ParallelConfig::from_json_file(path)
            .with_context(|| format!("cannot load configuration from {}", path.display()))?,
        None => ParallelConfig::default(),
    };
    let mut config = base.overlay_env(|key| std::env::var(key).ok());
    if args.no_distribute {
        config = config.with_no_distribute(true);
    }
    if args.threads {
        config = config.with_backend(BackendKind::Threads);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

pub async fn run(args: &RunArgs) -> anyhow::Result<Value> {
    let config = load_config(args)?;
    let engine = EngineBuilder::new()
        .config(config)
        .with_registry(tasks::registry()?)
        .expect_tasks(&[SumTask::NAME, CountTask::NAME, FailTask::NAME])
        .build()?;

    let hint = args.concurrency.unwrap_or_else(|| engine.config.task_hint());
    let items: Vec<u64> = (1..=args.items).collect();
    let splitter = BlockSplitter::new(hint);
    info!(task = ?args.task, items = args.items, hint, "running");

    let output = match args.task {
        TaskKind::Sum => {
            let mut manager = engine.manager(SumTask);
            let factor = args.arg.unwrap_or(1);
            let result = manager
                .apply_reduce(items, &factor, &splitter, |acc, n| acc + n, 0u64)
                .await;
            report(&manager, result)
        }
        TaskKind::Count => {
            let mut manager = engine.manager(CountTask);
            let result = manager
                .apply_reduce(
                    items,
                    &(),
                    &splitter,
                    |acc, counts| acc + counts,
                    AccumDict::<String, u64>::new(),
                )
                .await;
            report(&manager, result)
        }
        TaskKind::Fail => {
            let mut manager = engine.manager(FailTask);
            let divisor = args.arg.unwrap_or(7);
            let result = manager
                .apply_reduce(items, &divisor, &splitter, |acc, n| acc + n, 0usize)
                .await;
            report(&manager, result)
        }
    };
    engine.shutdown().await;
    output
}

fn report<T: Task, R: Serialize>(
    manager: &TaskManager<T>,
    result: Result<R, ParallelError>,
) -> anyhow::Result<Value> {
    let result = result.with_context(|| format!("task {} failed", manager.name()))?;
    Ok(json!({
        "result": result,
        "stats": TransferStats::of(manager),
    }))
}

/// Split the characters of `items` the way `apply_reduce` would.
pub fn chunks(items: &str, hint: usize, by_key: bool) -> Result<Vec<Vec<char>>, ParallelError> {
    let items: Vec<char> = items.chars().collect();
    let chunks = if by_key {
        BlockSplitter::new(hint).with_key(|c: &char| *c).split(items)?
    } else {
        BlockSplitter::new(hint).split(items)?
    };
    Ok(chunks.into_iter().map(Chunk::into_items).collect())
}
