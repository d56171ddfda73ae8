//! Task trait - 名前付き・型付きの作業単位
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - Associated types と trait bounds の組み合わせ
//!   (Serialize + DeserializeOwned + Send + 'static)
//!
//! task は別プロセスから呼べなければならないので、wire 上では `NAME` で
//! 識別し、両側が同じ task 型を登録する。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Monitor;

/// Task は chunk 単位で適用される計算
///
/// # 使用例
/// ```ignore
/// struct HazardCurves;
///
/// impl Task for HazardCurves {
///     const NAME: &'static str = "hazard.classical.curves.v1";
///     type Item = Source;
///     type Args = CurveParams;
///     type Output = AccumDict<SiteId, Curve>;
///     type Error = CurveError;
///
///     fn run(&self, sources: Vec<Source>, params: &CurveParams, monitor: &mut Monitor)
///         -> Result<Self::Output, CurveError> { ... }
/// }
/// ```
///
/// # 命名規則
/// - `{namespace}.{domain}.{action}.v{major}`
pub trait Task: Send + Sync + 'static {
    const NAME: &'static str;

    /// Element of the split sequence.
    type Item: Serialize + DeserializeOwned + Send + 'static;

    /// Arguments shared by every chunk of one call (never split).
    type Args: Serialize + DeserializeOwned + Send + Sync + 'static;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Run on one chunk. Writing to stdout is not allowed: inside a worker
    /// process stdout carries the reply frames.
    fn run(
        &self,
        items: Vec<Self::Item>,
        args: &Self::Args,
        monitor: &mut Monitor,
    ) -> Result<Self::Output, Self::Error>;
}
