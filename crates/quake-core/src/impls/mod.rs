//! Impls - Ports の実装
//!
//! - **ProcessBackend**: stdin/stdout で frame をやり取りする worker プロセス
//! - **ThreadBackend**: 現在のプロセス内の blocking スレッド
//! - **SystemMemoryProbe**: sysinfo による RAM 使用率

pub mod process_backend;
pub mod system_memory;
pub mod thread_backend;

pub use self::process_backend::ProcessBackend;
pub use self::system_memory::{SystemMemoryProbe, current_process_memory};
pub use self::thread_backend::ThreadBackend;
