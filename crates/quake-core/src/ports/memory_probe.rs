//! MemoryProbe port - memory guard が使用率を読む先
//!
//! # テスト容易性
//! - 本番コードは `SystemMemoryProbe`（impls::system_memory）を使う
//! - テストは `FixedMemoryProbe` で任意の使用率を再現する

use std::sync::atomic::{AtomicU64, Ordering};

/// Reports system memory utilization as a percentage (0..=100).
pub trait MemoryProbe: Send + Sync {
    fn used_percent(&self) -> f64;
}

/// Probe returning a settable value.
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    /// f64 bits, so the probe can be shared and adjusted without a lock.
    percent: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(percent: f64) -> Self {
        Self {
            percent: AtomicU64::new(percent.to_bits()),
        }
    }

    pub fn set(&self, percent: f64) {
        self.percent.store(percent.to_bits(), Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn used_percent(&self) -> f64 {
        f64::from_bits(self.percent.load(Ordering::Relaxed))
    }
}
