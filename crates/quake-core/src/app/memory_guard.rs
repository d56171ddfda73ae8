//! MemoryGuard - システムメモリの soft/hard 上限。submit の前と、結果を
//! 一つ収集するたびにチェックする。

use std::sync::Arc;

use tracing::warn;

use crate::config::ParallelConfig;
use crate::error::ParallelError;
use crate::impls::SystemMemoryProbe;
use crate::ports::MemoryProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStatus {
    Ok,
    /// Above the soft limit; a warning was logged.
    Warning,
}

#[derive(Clone)]
pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    soft: f64,
    hard: f64,
}

impl MemoryGuard {
    pub fn new(probe: Arc<dyn MemoryProbe>, soft: f64, hard: f64) -> Self {
        Self { probe, soft, hard }
    }

    /// System probe with the limits of `config`.
    pub fn from_config(config: &ParallelConfig) -> Self {
        Self::new(
            Arc::new(SystemMemoryProbe::new()),
            config.soft_memory_percent,
            config.hard_memory_percent,
        )
    }

    pub fn soft_limit(&self) -> f64 {
        self.soft
    }

    pub fn hard_limit(&self) -> f64 {
        self.hard
    }

    /// `ResourceExhausted` at or above the hard limit, a warning above the soft one.
    pub fn check(&self) -> Result<MemoryStatus, ParallelError> {
        let used = self.probe.used_percent();
        if used >= self.hard {
            return Err(ParallelError::ResourceExhausted {
                used,
                allowed: self.hard,
            });
        }
        if used > self.soft {
            warn!("Using over {:.0}% of the memory!", used);
            return Ok(MemoryStatus::Warning);
        }
        Ok(MemoryStatus::Ok)
    }
}
