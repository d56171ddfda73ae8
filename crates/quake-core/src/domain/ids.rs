//! Domain 識別子（強い型付き ID）
//!
//! ID はすべて `Id<T>` に包んだ ULID。`T` はコンパイル時にだけ存在する
//! ゼロサイズのマーカーなので、どちらも 128-bit の ULID であっても
//! `CallId` と `PoolId` を取り違えることはない。
//!
//! # 学習ポイント
//! - PhantomData による型安全な ID

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds; provides the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Markers
// ========================================

/// One submitted call (request/reply correlation on the worker wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {}

impl IdMarker for Call {
    fn prefix() -> &'static str {
        "call-"
    }
}

/// One generation of the worker pool (between two restarts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pool {}

impl IdMarker for Pool {
    fn prefix() -> &'static str {
        "pool-"
    }
}

pub type CallId = Id<Call>;

pub type PoolId = Id<Pool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_distinct_prefixes() {
        let call = CallId::generate();
        let pool = PoolId::generate();

        assert!(call.to_string().starts_with("call-"));
        assert!(pool.to_string().starts_with("pool-"));
        // let _: PoolId = call; // <- does not compile
    }

    #[test]
    fn generations_differ() {
        assert_ne!(PoolId::generate(), PoolId::generate());
    }

    #[test]
    fn ids_roundtrip_through_json() {
        let call = CallId::generate();
        let serialized = serde_json::to_string(&call).unwrap();
        let back: CallId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(call, back);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<CallId>(), size_of::<Ulid>());
        assert_eq!(size_of::<PoolId>(), 16);
    }
}
