//! Product co-occurrence mining
//!
//! Purchases are grouped into one ordered product sequence per user; every
//! unordered pair within a sequence is counted under its canonical order
//! (smaller id first). Per-user counters merge by summation, so users can be
//! processed in any partitioning and order.
//!
//! Duplicate purchases are kept: buying product 1 twice next to product 2
//! counts (1, 2) twice, treating repeat co-purchase as stronger affinity.
//! A product is never paired with itself.
//!
//! Counting is quadratic in sequence length. Long histories should be capped
//! with [`MinerParams::max_user_history`], which keeps the most recent
//! purchases.

use crate::config::PipelineConfig;
use crate::monoid::Monoid;
use crate::schema::TransactionRecord;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};

/// Canonically ordered product pair: `.0 < .1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductPair(i64, i64);

impl ProductPair {
    /// Canonicalize; `None` for a self-pair
    pub fn new(a: i64, b: i64) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(ProductPair(a, b)),
            std::cmp::Ordering::Greater => Some(ProductPair(b, a)),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> i64 {
        self.0
    }

    pub fn second(&self) -> i64 {
        self.1
    }
}

/// Mergeable pair → count map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairCounts(HashMap<ProductPair, u64>);

impl PairCounts {
    pub fn increment(&mut self, pair: ProductPair) {
        *self.0.entry(pair).or_insert(0) += 1;
    }

    pub fn get(&self, a: i64, b: i64) -> u64 {
        ProductPair::new(a, b)
            .and_then(|pair| self.0.get(&pair).copied())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rows sorted by count descending, then by pair
    pub fn ranked(&self) -> Vec<ProductPairCount> {
        let mut rows: Vec<ProductPairCount> = self
            .0
            .iter()
            .map(|(pair, &count)| ProductPairCount {
                product_a: pair.0,
                product_b: pair.1,
                count,
            })
            .collect();
        rows.sort_by(|x, y| {
            y.count
                .cmp(&x.count)
                .then_with(|| (x.product_a, x.product_b).cmp(&(y.product_a, y.product_b)))
        });
        rows
    }
}

impl Monoid for PairCounts {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        PairCounts(self.0.combine(other.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductPairCount {
    pub product_a: i64,
    pub product_b: i64,
    pub count: u64,
}

/// How pairs are counted within one user's purchase sequence
pub trait PairCounter: Send + Sync {
    fn count_user(&self, products: &[i64]) -> PairCounts;
}

/// All i < j index pairs of the sequence
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedLoopCounter;

impl PairCounter for NestedLoopCounter {
    fn count_user(&self, products: &[i64]) -> PairCounts {
        let mut counts = PairCounts::default();
        for (i, &a) in products.iter().enumerate() {
            for &b in &products[i + 1..] {
                if let Some(pair) = ProductPair::new(a, b) {
                    counts.increment(pair);
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinerParams {
    pub max_user_history: Option<usize>,
}

impl From<&PipelineConfig> for MinerParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_user_history: config.max_user_history,
        }
    }
}

/// Each user's products ordered by (timestamp, order_id)
pub fn user_sequences(records: &[TransactionRecord]) -> BTreeMap<i64, Vec<i64>> {
    let mut grouped: BTreeMap<i64, Vec<(DateTime<Utc>, i64, i64)>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.user_id)
            .or_default()
            .push((record.timestamp, record.order_id, record.product_id));
    }

    grouped
        .into_iter()
        .map(|(user_id, mut purchases)| {
            purchases.sort_unstable();
            (user_id, purchases.into_iter().map(|(_, _, product)| product).collect())
        })
        .collect()
}

/// Count co-occurring product pairs across all users.
#[instrument(skip_all, fields(records = records.len()))]
pub fn mine_pairs(
    records: &[TransactionRecord],
    counter: &dyn PairCounter,
    params: &MinerParams,
) -> PairCounts {
    let sequences: Vec<Vec<i64>> = user_sequences(records).into_values().collect();

    let counts = sequences
        .par_iter()
        .map(|products| {
            let start = params
                .max_user_history
                .map_or(0, |cap| products.len().saturating_sub(cap));
            counter.count_user(&products[start..])
        })
        .reduce(PairCounts::empty, PairCounts::combine);

    info!(users = sequences.len(), pairs = counts.len(), "co-occurrence pairs mined");
    counts
}

/// Most purchased product per category; ties go to the smaller product id.
pub fn top_product_by_category(records: &[TransactionRecord]) -> BTreeMap<String, (i64, u64)> {
    let mut counts: BTreeMap<&str, BTreeMap<i64, u64>> = BTreeMap::new();
    for record in records {
        *counts
            .entry(record.category.as_str())
            .or_default()
            .entry(record.product_id)
            .or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(category, products)| {
            products
                .into_iter()
                .max_by(|(a_id, a_n), (b_id, b_n)| a_n.cmp(b_n).then_with(|| b_id.cmp(a_id)))
                .map(|top| (category.to_string(), top))
        })
        .collect()
}
