//! Ports - オーケストレーションとマシンの間の境界
//!
//! 各 trait は外部の関心事（呼び出しをどう実行するか、メモリをどう測るか）を
//! 一つずつ隠すので、task manager はプロセス内の代替実装でテストできる。
//!
//! # 学習ポイント
//! - `async_trait` による object-safe な async port

pub mod backend;
pub mod memory_probe;

pub use self::backend::WorkerBackend;
pub use self::memory_probe::{FixedMemoryProbe, MemoryProbe};
