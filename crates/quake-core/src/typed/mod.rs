//! Typed - 型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait - item・引数・出力が serde で型付け
//! - **内部（Dyn）**: object-safe な `DynTask` - `TaskRegistry` で名前から
//!   引き、envelope 化された呼び出しを渡す

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynTask, TypedTask};
pub use self::registry::TaskRegistry;
pub use self::task::Task;
