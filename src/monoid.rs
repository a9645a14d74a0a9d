//! Partition-local accumulation merged through a commutative monoid
//!
//! Every stage that reduces over records accumulates into a value
//! implementing [`Monoid`], one per fixed-size partition, and the partials are
//! combined in partition order. Because partitions have a fixed size, the
//! combine tree does not depend on the number of worker threads, which keeps
//! floating-point sums reproducible across runs.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Rows per partition for [`fold_partitioned`]
pub const PARTITION_ROWS: usize = 4096;

/// An associative, commutative merge with an identity element.
pub trait Monoid: Sized {
    fn empty() -> Self;
    fn combine(self, other: Self) -> Self;
}

impl Monoid for u64 {
    fn empty() -> Self {
        0
    }

    fn combine(self, other: Self) -> Self {
        self + other
    }
}

impl<K: Ord, V: Monoid> Monoid for BTreeMap<K, V> {
    fn empty() -> Self {
        BTreeMap::new()
    }

    fn combine(self, other: Self) -> Self {
        let (mut into, from) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (key, value) in from {
            let merged = match into.remove(&key) {
                Some(existing) => existing.combine(value),
                None => value,
            };
            into.insert(key, merged);
        }
        into
    }
}

impl<K: Eq + Hash, V: Monoid> Monoid for HashMap<K, V> {
    fn empty() -> Self {
        HashMap::new()
    }

    fn combine(self, other: Self) -> Self {
        let (mut into, from) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (key, value) in from {
            let merged = match into.remove(&key) {
                Some(existing) => existing.combine(value),
                None => value,
            };
            into.insert(key, merged);
        }
        into
    }
}

/// Fold `items` in parallel, one accumulator per partition, then merge the
/// partials in partition order.
pub fn fold_partitioned<T, M, F>(items: &[T], accumulate: F) -> M
where
    T: Sync,
    M: Monoid + Send,
    F: Fn(&mut M, &T) + Sync + Send,
{
    let partials: Vec<M> = items
        .par_chunks(PARTITION_ROWS)
        .map(|chunk| {
            let mut acc = M::empty();
            for item in chunk {
                accumulate(&mut acc, item);
            }
            acc
        })
        .collect();

    partials.into_iter().fold(M::empty(), M::combine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_combine_sums_shared_keys() {
        let a: BTreeMap<&str, u64> = [("x", 1), ("y", 2)].into_iter().collect();
        let b: BTreeMap<&str, u64> = [("y", 3), ("z", 4)].into_iter().collect();

        let ab = a.clone().combine(b.clone());
        let ba = b.combine(a);
        assert_eq!(ab, ba);
        assert_eq!(ab["y"], 5);
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn test_fold_partitioned_matches_sequential() {
        let items: Vec<u64> = (0..10_000).collect();
        let total: u64 = fold_partitioned(&items, |acc: &mut u64, v| *acc += v);
        assert_eq!(total, items.iter().sum::<u64>());
    }

    #[test]
    fn test_fold_partitioned_empty_input() {
        let items: Vec<u64> = Vec::new();
        let counts: HashMap<u64, u64> = fold_partitioned(&items, |acc: &mut HashMap<u64, u64>, v| {
            *acc.entry(*v).or_insert(0) += 1;
        });
        assert!(counts.is_empty());
    }
}
