//! ログの初期化
//!
//! 出力はすべて stderr。worker の stdout は frame を運び、親は stdout に
//! レポートを出すため。

use tracing::debug;
use tracing_subscriber::EnvFilter;

pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .init();

    debug!("quake started with verbosity level: {}", verbose);
}

/// Workers log warnings only, unless `RUST_LOG` says otherwise.
pub fn init_worker_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "info")]
    #[case(1, "debug")]
    #[case(2, "trace")]
    #[case(5, "trace")]
    fn verbosity_levels(#[case] verbose: u8, #[case] expected: &str) {
        assert_eq!(log_level(verbose), expected);
    }
}
