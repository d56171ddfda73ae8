//! App - アプリケーション層
//!
//! domain と ports を組み合わせて、分散実行のオーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: registry・設定・pool のワイヤリング
//! - **TaskManager**: submit / starmap / apply_reduce / reduce / wait
//! - **WorkerPool**: worker backend の世代管理
//! - **safe_call**: 失敗を外に漏らさずに task を実行
//! - **MemoryGuard**, **Progress**: 収集まわりのチェックとログ
//! - **worker_loop**: worker プロセスの serve ループ

pub mod builder;
pub mod manager;
pub mod memory_guard;
pub mod pool;
pub mod progress;
pub mod safe_call;
pub mod worker_loop;

pub use self::builder::{BuildError, Engine, EngineBuilder};
pub use self::manager::{ManagerState, TaskManager};
pub use self::memory_guard::{MemoryGuard, MemoryStatus};
pub use self::pool::{Dispatched, WorkerPool};
pub use self::progress::Progress;
pub use self::safe_call::{safely_call, safely_call_enveloped};
pub use self::worker_loop::{is_worker_process, run_worker, serve};
