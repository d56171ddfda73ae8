//! quake-core
//!
//! 大きな計算を重み付き・キー付きの chunk に分割し、worker プロセスの pool で
//! 実行して結果を畳み込むためのライブラリ。
//!
//! # モジュール構成
//! - **domain**: chunk, envelope, monitor, 結果, wire メッセージ
//! - **typed**: `Task` trait, task registry, frame codec
//! - **ports**: `WorkerBackend`, `MemoryProbe`
//! - **impls**: プロセス / スレッド backend, sysinfo によるメモリ計測
//! - **app**: task manager, worker pool, safe call, worker loop, builder
//! - **config**: `ParallelConfig`
//! - **error**: `ParallelError`

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{Engine, EngineBuilder, TaskManager, WorkerPool};
pub use config::{BackendKind, ParallelConfig};
pub use domain::{AccumDict, BlockSplitter, Envelope, Monitor, TaskResult};
pub use error::ParallelError;
pub use observability::TransferStats;
pub use typed::Task;
