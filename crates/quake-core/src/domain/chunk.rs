//! Chunker - 重み付き（キー付きも可）の列を、重みがほぼ等しい block に分割
//!
//! まずキーでグループ化する（グループはキーの初出順、グループ内は入力順）。
//! 各グループは最大 `hint` 個の連続した block に切られる。同じキーの item が
//! 別のグループに分かれることはないので、キーが複数あると全体で `hint` を
//! 超える chunk ができることがある。
//!
//! # 学習ポイント
//! - 閾値の二分探索（重みが偏っていても per-group の上限を守る）
//! - `with_weight` / `with_key` による `Box<dyn Fn>` の差し替え

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::ParallelError;

/// Bisection steps when the plain `total / hint` threshold yields too many
/// blocks. 64 halvings exhaust f64 precision for any realistic total.
const THRESHOLD_SEARCH_STEPS: usize = 64;

/// A block of items handed to one task invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<I> {
    items: Vec<I>,
    weight: f64,
}

impl<I> Chunk<I> {
    pub fn items(&self) -> &[I] {
        &self.items
    }

    pub fn into_items(self) -> Vec<I> {
        self.items
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

type WeightFn<I> = Box<dyn Fn(&I) -> f64 + Send + Sync>;
type KeyFn<I, K> = Box<dyn Fn(&I) -> K + Send + Sync>;

/// Splitting policy: concurrency hint, weight function and key function.
///
/// # Example
/// ```ignore
/// let chunks = BlockSplitter::new(3)
///     .with_weight(|src: &Source| src.num_ruptures as f64)
///     .with_key(|src: &Source| src.trt.clone())
///     .split(sources)?;
/// ```
pub struct BlockSplitter<I, K = ()> {
    hint: usize,
    weight: WeightFn<I>,
    key: KeyFn<I, K>,
}

impl<I> BlockSplitter<I, ()> {
    /// Unit weights, a single implicit group.
    pub fn new(hint: usize) -> Self {
        Self {
            hint,
            weight: Box::new(|_| 1.0),
            key: Box::new(|_| ()),
        }
    }
}

impl<I, K: Eq + Hash> BlockSplitter<I, K> {
    pub fn with_weight(mut self, weight: impl Fn(&I) -> f64 + Send + Sync + 'static) -> Self {
        self.weight = Box::new(weight);
        self
    }

    pub fn with_key<K2: Eq + Hash>(
        self,
        key: impl Fn(&I) -> K2 + Send + Sync + 'static,
    ) -> BlockSplitter<I, K2> {
        BlockSplitter {
            hint: self.hint,
            weight: self.weight,
            key: Box::new(key),
        }
    }

    pub fn with_hint(mut self, hint: usize) -> Self {
        self.hint = hint;
        self
    }

    /// The requested concurrency; `0` means "run in the caller's process".
    pub fn hint(&self) -> usize {
        self.hint
    }

    pub fn weight_of(&self, item: &I) -> f64 {
        (self.weight)(item)
    }

    /// Partition `items`. A hint of `0` splits as if it were `1`.
    pub fn split(&self, items: impl IntoIterator<Item = I>) -> Result<Vec<Chunk<I>>, ParallelError> {
        let mut group_of: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<Vec<(I, f64)>> = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            let weight = (self.weight)(&item);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ParallelError::InvalidWeight { index, weight });
            }
            let next = groups.len();
            let group = *group_of.entry((self.key)(&item)).or_insert(next);
            if group == next {
                groups.push(Vec::new());
            }
            groups[group].push((item, weight));
        }

        let hint = self.hint.max(1);
        let mut chunks = Vec::new();
        for group in groups {
            let weights: Vec<f64> = group.iter().map(|(_, w)| *w).collect();
            let threshold = balanced_threshold(&weights, hint);
            cut(group, threshold, &mut chunks);
        }
        Ok(chunks)
    }
}

/// Smallest threshold, starting at `total / hint`, for which the greedy
/// cut yields at most `hint` blocks.
fn balanced_threshold(weights: &[f64], hint: usize) -> f64 {
    let total: f64 = weights.iter().sum();
    let mut lo = total / hint as f64;
    if count_blocks(weights, lo) <= hint {
        return lo;
    }
    // a single block always fits under the total weight
    let mut hi = total;
    for _ in 0..THRESHOLD_SEARCH_STEPS {
        let mid = lo + (hi - lo) / 2.0;
        if mid <= lo || mid >= hi {
            break;
        }
        if count_blocks(weights, mid) <= hint {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

fn count_blocks(weights: &[f64], threshold: f64) -> usize {
    let mut blocks = 0;
    let mut current: Option<f64> = None;
    for &w in weights {
        current = match current {
            Some(acc) if acc + w <= threshold => Some(acc + w),
            _ => {
                blocks += 1;
                Some(w)
            }
        };
    }
    blocks
}

fn cut<I>(group: Vec<(I, f64)>, threshold: f64, out: &mut Vec<Chunk<I>>) {
    let mut current = Chunk {
        items: Vec::new(),
        weight: 0.0,
    };
    for (item, w) in group {
        if !current.is_empty() && current.weight + w > threshold {
            out.push(std::mem::replace(
                &mut current,
                Chunk {
                    items: Vec::new(),
                    weight: 0.0,
                },
            ));
        }
        current.items.push(item);
        current.weight += w;
    }
    if !current.is_empty() {
        out.push(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rstest::rstest;

    fn lengths<I>(chunks: &[Chunk<I>]) -> Vec<usize> {
        chunks.iter().map(Chunk::len).collect()
    }

    #[test]
    fn equal_weights_are_front_loaded() {
        let chunks = BlockSplitter::new(3).split(0..10).unwrap();
        assert_eq!(lengths(&chunks), vec![4, 4, 2]);
        assert_eq!(chunks[0].items(), &[0, 1, 2, 3]);
        assert_eq!(chunks[2].weight(), 2.0);
    }

    #[test]
    fn keys_form_separate_chunks_even_with_zero_hint() {
        let chunks = BlockSplitter::new(0)
            .with_key(|c: &char| *c)
            .split("aaabb".chars())
            .unwrap();
        let items: Vec<Vec<char>> = chunks.into_iter().map(Chunk::into_items).collect();
        assert_eq!(items, vec![vec!['a', 'a', 'a'], vec!['b', 'b']]);
    }

    #[test]
    fn interleaved_keys_are_never_split() {
        let chunks = BlockSplitter::new(1)
            .with_key(|s: &&str| s.chars().next())
            .split(["a1", "b1", "a2", "b2", "a3"])
            .unwrap();
        let items: Vec<Vec<&str>> = chunks.into_iter().map(Chunk::into_items).collect();
        assert_eq!(items, vec![vec!["a1", "a2", "a3"], vec!["b1", "b2"]]);
    }

    #[test]
    fn uneven_weights_stay_within_hint() {
        let chunks = BlockSplitter::new(2)
            .with_weight(|w: &f64| *w)
            .split([3.0, 2.0, 3.0])
            .unwrap();
        assert!(chunks.len() <= 2);
        assert_eq!(chunks.iter().map(Chunk::len).sum::<usize>(), 3);
    }

    #[test]
    fn heavy_item_gets_its_own_chunk() {
        let chunks = BlockSplitter::new(3)
            .with_weight(|w: &f64| *w)
            .split([1.0, 1.0, 10.0, 1.0])
            .unwrap();
        assert!(chunks.len() <= 3);
        assert!(chunks.iter().any(|c| c.items() == [10.0]));
    }

    #[test]
    fn zero_weights_collapse_into_one_chunk() {
        let chunks = BlockSplitter::new(4)
            .with_weight(|_: &i32| 0.0)
            .split(1..=5)
            .unwrap();
        assert_eq!(lengths(&chunks), vec![5]);
    }

    #[test]
    fn empty_input_gives_no_chunks() {
        let chunks = BlockSplitter::new(4).split(Vec::<u8>::new()).unwrap();
        assert!(chunks.is_empty());
    }

    #[rstest]
    #[case(-1.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn invalid_weights_are_rejected(#[case] bad: f64) {
        let err = BlockSplitter::new(2)
            .with_weight(move |i: &usize| if *i == 2 { bad } else { 1.0 })
            .split(0..4)
            .unwrap_err();
        assert!(matches!(err, ParallelError::InvalidWeight { index: 2, .. }));
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    #[case(16)]
    fn random_sequences_keep_items_and_respect_hint(#[case] hint: usize) {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(1..200);
            let items: Vec<(usize, f64, u8)> = (0..len)
                .map(|i| (i, rng.gen_range(0.0..10.0), rng.gen_range(0..3)))
                .collect();

            let chunks = BlockSplitter::new(hint)
                .with_weight(|it: &(usize, f64, u8)| it.1)
                .with_key(|it: &(usize, f64, u8)| it.2)
                .split(items.clone())
                .unwrap();

            let mut seen: Vec<usize> = chunks
                .iter()
                .flat_map(|c| c.items().iter().map(|it| it.0))
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..len).collect::<Vec<_>>());

            let mut per_key: HashMap<u8, usize> = HashMap::new();
            for chunk in &chunks {
                let key = chunk.items()[0].2;
                assert!(chunk.items().iter().all(|it| it.2 == key));
                *per_key.entry(key).or_default() += 1;
            }
            assert!(per_key.values().all(|&n| n <= hint), "{per_key:?}");
        }
    }
}
