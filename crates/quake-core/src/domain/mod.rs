//! Domain - chunk, envelope, monitor, 結果, wire メッセージ

pub mod accum;
pub mod call;
pub mod chunk;
pub mod envelope;
pub mod ids;
pub mod monitor;
pub mod outcome;

pub use accum::{AccumDict, do_not_aggregate};
pub use call::{TaskCall, WorkerReply};
pub use chunk::{BlockSplitter, Chunk};
pub use envelope::{Envelope, EnvelopeCache, human_size, wrap_all};
pub use ids::{CallId, PoolId};
pub use monitor::{Monitor, MonitorNode, MonitorRow};
pub use outcome::{TaskError, TaskResult};
