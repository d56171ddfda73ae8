use serde::Serialize;

use crate::app::TaskManager;
use crate::domain::{MonitorRow, human_size};
use crate::typed::Task;

/// Summary of what a task manager moved and measured, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub task: String,
    pub distributed: bool,
    pub chunks: Vec<usize>,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub sent: String,
    pub received: String,
    pub operations: Vec<MonitorRow>,
}

impl TransferStats {
    pub fn of<T: Task>(manager: &TaskManager<T>) -> Self {
        Self {
            task: manager.name().to_string(),
            distributed: manager.is_distributed(),
            chunks: manager.last_chunk_lengths().to_vec(),
            sent_bytes: manager.sent(),
            received_bytes: manager.received(),
            sent: human_size(manager.sent()),
            received: human_size(manager.received()),
            operations: manager.monitor().rows(),
        }
    }
}
