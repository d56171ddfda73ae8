use clap::Parser;

use quake_cli::cli::Cli;
use quake_cli::{commands, logging, tasks};
use quake_core::app::{is_worker_process, run_worker};

fn main() -> anyhow::Result<()> {
    // a pool worker: serve frames on stdin/stdout until the parent hangs up
    if is_worker_process() {
        logging::init_worker_logging();
        let registry = tasks::registry()?;
        run_worker(&registry)?;
        return Ok(());
    }

    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::execute(cli.command))
}
