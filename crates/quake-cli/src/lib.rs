//! quake-cli
//!
//! `quake` バイナリ: quake-core の小さなフロントエンド。`QUAKE_WORKER=1` で
//! 起動されたときはプロセス pool の worker 実行ファイルになる。

pub mod cli;
pub mod commands;
pub mod logging;
pub mod tasks;
