//! Envelope - 値の明示的なシリアライズ済みスナップショット
//!
//! worker 境界をまたぐもの（chunk の item、共有引数、monitor、結果）はすべて
//! `Envelope` として運ぶ。payload は生成時に一度だけシリアライズされ、共有の
//! raw JSON として保持されるので、clone しても wire frame に埋め込んでも
//! 再シリアライズは起きない。
//!
//! # 学習ポイント
//! - `serde_json::value::RawValue` と `Arc` による共有
//! - `Any::downcast_ref` による既存 envelope の素通し

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::ParallelError;

/// Serialized value tagged with the name of its original type.
///
/// Wire form: `{"type_name": "...", "payload": <raw json>}`. The length of
/// the payload is the transfer size used for `sent`/`received` accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    type_name: String,
    payload: Arc<RawValue>,
}

impl Envelope {
    /// Serialize `obj` into a new envelope.
    pub fn wrap<T: Serialize + ?Sized>(obj: &T) -> Result<Self, ParallelError> {
        let type_name = std::any::type_name::<T>();
        let payload = serde_json::value::to_raw_value(obj).map_err(|source| {
            ParallelError::Serialization {
                type_name: type_name.to_string(),
                source,
            }
        })?;
        Ok(Self {
            type_name: type_name.to_string(),
            payload: Arc::from(payload),
        })
    }

    /// Deserialize a fresh value out of the envelope.
    ///
    /// The envelope is left untouched; each call returns an independent value.
    pub fn unwrap<T: DeserializeOwned>(&self) -> Result<T, ParallelError> {
        serde_json::from_str(self.payload.get()).map_err(|source| ParallelError::Serialization {
            type_name: std::any::type_name::<T>().to_string(),
            source,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Size of the serialized payload in bytes.
    pub fn len(&self) -> usize {
        self.payload.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.get().is_empty()
    }

    /// True when both envelopes share the same serialized buffer, i.e. the
    /// value was serialized only once.
    pub fn shares_payload(&self, other: &Envelope) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Serialized size of each top-level field, largest first.
    ///
    /// Useful to find out which part of a task argument dominates the
    /// transfer. Returns an empty list when the payload is not a JSON object.
    pub fn field_sizes(&self) -> Vec<(String, usize)> {
        let fields: HashMap<String, Box<RawValue>> = match serde_json::from_str(self.payload.get())
        {
            Ok(fields) => fields,
            Err(_) => return Vec::new(),
        };
        let mut sizes: Vec<(String, usize)> = fields
            .into_iter()
            .map(|(name, raw)| (name, raw.get().len()))
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sizes
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Envelope {} {}>",
            self.type_name,
            human_size(self.len() as u64)
        )
    }
}

/// Memoizes envelopes by object identity for the duration of one batch.
///
/// The key is the address of the borrowed object plus its type name; the
/// `'a` borrow keeps every wrapped object alive (and its address unique) for
/// as long as the cache is in use. The cache owns envelopes only, never the
/// objects themselves.
pub struct EnvelopeCache<'a> {
    wrapped: HashMap<(usize, &'static str), Envelope>,
    _borrow: PhantomData<&'a ()>,
}

impl<'a> EnvelopeCache<'a> {
    pub fn new() -> Self {
        Self {
            wrapped: HashMap::new(),
            _borrow: PhantomData,
        }
    }

    /// Wrap `obj`, or return the envelope already built for the same object.
    ///
    /// An `obj` that is itself an `Envelope` is passed through: the result
    /// shares its payload and nothing is serialized.
    pub fn wrap<T: Serialize + Any>(&mut self, obj: &'a T) -> Result<Envelope, ParallelError> {
        if let Some(envelope) = (obj as &dyn Any).downcast_ref::<Envelope>() {
            return Ok(envelope.clone());
        }
        self.wrap_value(obj)
    }

    /// Like [`EnvelopeCache::wrap`], but always serializes `obj`, even an
    /// `Envelope`. Used where the receiver decodes into the declared type.
    pub fn wrap_value<T: Serialize + ?Sized>(
        &mut self,
        obj: &'a T,
    ) -> Result<Envelope, ParallelError> {
        let key = (
            std::ptr::from_ref(obj).cast::<()>() as usize,
            std::any::type_name::<T>(),
        );
        if let Some(envelope) = self.wrapped.get(&key) {
            return Ok(envelope.clone());
        }
        let envelope = Envelope::wrap(obj)?;
        self.wrapped.insert(key, envelope.clone());
        Ok(envelope)
    }

    /// Number of distinct objects serialized so far.
    pub fn len(&self) -> usize {
        self.wrapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrapped.is_empty()
    }
}

impl Default for EnvelopeCache<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a sequence of objects, serializing each distinct object once.
///
/// Objects repeated by reference share one envelope in the output, and
/// envelopes in the input are passed through unchanged.
pub fn wrap_all<'a, T, I>(objects: I) -> Result<Vec<Envelope>, ParallelError>
where
    T: Serialize + Any,
    I: IntoIterator<Item = &'a T>,
{
    let mut cache = EnvelopeCache::new();
    objects.into_iter().map(|obj| cache.wrap(obj)).collect()
}

/// Render a byte count with binary multiples, e.g. `1.5 KB`.
pub fn human_size(nbytes: u64) -> String {
    const SUFFIXES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if nbytes == 0 {
        return "0 B".to_string();
    }
    let mut size = nbytes as f64;
    let mut index = 0;
    while size >= 1024.0 && index < SUFFIXES.len() - 1 {
        size /= 1024.0;
        index += 1;
    }
    let formatted = format!("{size:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", SUFFIXES[index])
}
