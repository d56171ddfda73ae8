//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Split work into chunks and run it on a pool of worker processes
#[derive(Parser, Debug)]
#[command(name = "quake")]
#[command(about = "quake - chunked parallel map/reduce over worker processes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task over the items 1..=N and print the reduced result as JSON
    #[command(name = "run")]
    Run(RunArgs),

    /// Print how a string's characters would be split into chunks
    #[command(name = "chunks")]
    Chunks {
        /// Characters to split, one item each
        #[arg(long)]
        items: String,

        /// Target number of chunks per key
        #[arg(long)]
        hint: usize,

        /// Keep equal characters in the same chunk
        #[arg(long)]
        by_key: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Task to run
    #[arg(long, value_enum)]
    pub task: TaskKind,

    /// Number of items
    #[arg(long)]
    pub items: u64,

    /// Number of chunks; 0 runs everything in this process
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Task argument (factor for `sum`, divisor for `fail`)
    #[arg(long)]
    pub arg: Option<u64>,

    /// Run every chunk in this process
    #[arg(long)]
    pub no_distribute: bool,

    /// Use threads instead of worker processes
    #[arg(long)]
    pub threads: bool,

    /// Number of workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Count,
    Sum,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::try_parse_from([
            "quake", "-v", "run", "--task", "sum", "--items", "10", "--concurrency", "3",
            "--threads",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task, TaskKind::Sum);
                assert_eq!(args.items, 10);
                assert_eq!(args.concurrency, Some(3));
                assert!(args.threads);
                assert!(!args.no_distribute);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_chunks() {
        let cli =
            Cli::try_parse_from(["quake", "chunks", "--items", "aaabb", "--hint", "0", "--by-key"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Chunks { ref items, hint: 0, by_key: true } if items == "aaabb"
        ));
    }

    #[test]
    fn unknown_task_is_rejected() {
        assert!(Cli::try_parse_from(["quake", "run", "--task", "nope", "--items", "1"]).is_err());
    }
}
