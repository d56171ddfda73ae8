//! Accumulators for `reduce`.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// A map whose values are summed key by key when two maps are added.
///
/// This is the natural accumulator for per-key aggregates such as losses per
/// asset or curves per site: `acc + partial` merges the partial result in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccumDict<K: Ord, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> AccumDict<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.entries
    }
}

impl<K: Ord, V: AddAssign> AccumDict<K, V> {
    /// Add `value` to the entry for `key`, inserting it if missing.
    pub fn accumulate(&mut self, key: K, value: V) {
        match self.entries.get_mut(&key) {
            Some(existing) => *existing += value,
            None => {
                self.entries.insert(key, value);
            }
        }
    }
}

impl<K: Ord, V> Default for AccumDict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V: AddAssign> Add for AccumDict<K, V> {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        for (key, value) in other.entries {
            self.accumulate(key, value);
        }
        self
    }
}

/// Repeated keys are accumulated, not overwritten.
impl<K: Ord, V: AddAssign> FromIterator<(K, V)> for AccumDict<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut acc = Self::new();
        for (key, value) in iter {
            acc.accumulate(key, value);
        }
        acc
    }
}

/// `reduce` combiner that keeps the accumulator and drops every value;
/// for tasks run only for their side effects.
pub fn do_not_aggregate<A, V>(acc: A, _value: V) -> A {
    acc
}
