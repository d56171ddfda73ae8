//! 既知のステップ数に対する進捗パーセントのログ出力。

use tracing::info;

/// Logs `"<name> <pct>%"` each time the integer percentage grows past the
/// last logged one (0% is never logged).
///
/// Exactly one 100% line is logged, when the last step completes. Advancing
/// past the total does nothing, and a total of zero never logs.
#[derive(Debug)]
pub struct Progress {
    name: String,
    total: usize,
    done: usize,
    last_logged: u8,
}

impl Progress {
    pub fn new(name: impl Into<String>, total: usize) -> Self {
        Self {
            name: name.into(),
            total,
            done: 0,
            last_logged: 0,
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Count one completed step; returns the percentage if a line was logged.
    pub fn advance(&mut self) -> Option<u8> {
        if self.total == 0 || self.done >= self.total {
            return None;
        }
        self.done += 1;
        let percent = (self.done * 100 / self.total) as u8;
        if percent <= self.last_logged {
            return None;
        }
        self.last_logged = percent;
        info!("{} {:3}%", self.name, percent);
        Some(percent)
    }
}
