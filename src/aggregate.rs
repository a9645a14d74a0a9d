//! Time-bucketed sales aggregation
//!
//! Transactions are grouped by (year, month, category). Only observed cells
//! produce a bucket; there is no zero-fill for months without sales.

use crate::monoid::{fold_partitioned, Monoid};
use crate::schema::TransactionRecord;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, instrument};

/// Calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self { year, month }
    }

    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        Self::new(timestamp.year(), timestamp.month())
    }

    /// The month after this one
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Whole months from `origin` to `self` (negative if `self` is earlier)
    pub fn months_since(self, origin: Period) -> i64 {
        (self.year as i64 - origin.year as i64) * 12 + (self.month as i64 - origin.month as i64)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Additive (sum, count) cell
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SalesAccumulator {
    pub total_sales: f64,
    pub order_count: u64,
}

impl SalesAccumulator {
    fn add(&mut self, record: &TransactionRecord) {
        self.total_sales += record.line_total();
        self.order_count += 1;
    }
}

impl Monoid for SalesAccumulator {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        Self {
            total_sales: self.total_sales + other.total_sales,
            order_count: self.order_count + other.order_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeCategoryBucket {
    pub period: Period,
    pub category: String,
    pub total_sales: f64,
    pub order_count: u64,
}

/// Per-category running total across all periods
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total_sales: f64,
    pub order_count: u64,
}

/// Merged aggregation state for a set of transactions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesAggregate {
    buckets: BTreeMap<(Period, String), SalesAccumulator>,
    categories: BTreeMap<String, SalesAccumulator>,
}

impl Monoid for SalesAggregate {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        Self {
            buckets: self.buckets.combine(other.buckets),
            categories: self.categories.combine(other.categories),
        }
    }
}

impl SalesAggregate {
    /// Fold one record into its bucket and its category total
    pub fn add(&mut self, record: &TransactionRecord) {
        self.buckets
            .entry((Period::of(&record.timestamp), record.category.clone()))
            .or_default()
            .add(record);
        self.categories
            .entry(record.category.clone())
            .or_default()
            .add(record);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets ordered by (year, month, category)
    pub fn buckets(&self) -> Vec<TimeCategoryBucket> {
        self.buckets
            .iter()
            .map(|((period, category), acc)| TimeCategoryBucket {
                period: *period,
                category: category.clone(),
                total_sales: acc.total_sales,
                order_count: acc.order_count,
            })
            .collect()
    }

    /// Categories ranked by total sales, highest first
    pub fn top_categories(&self) -> Vec<CategoryTotal> {
        let mut totals: Vec<CategoryTotal> = self
            .categories
            .iter()
            .map(|(category, acc)| CategoryTotal {
                category: category.clone(),
                total_sales: acc.total_sales,
                order_count: acc.order_count,
            })
            .collect();
        totals.sort_by(|a, b| {
            b.total_sales
                .total_cmp(&a.total_sales)
                .then_with(|| a.category.cmp(&b.category))
        });
        totals
    }

    /// Each category's buckets in period order
    pub fn category_histories(&self) -> BTreeMap<String, Vec<TimeCategoryBucket>> {
        let mut histories: BTreeMap<String, Vec<TimeCategoryBucket>> = BTreeMap::new();
        for bucket in self.buckets() {
            histories
                .entry(bucket.category.clone())
                .or_default()
                .push(bucket);
        }
        histories
    }

    pub fn grand_total(&self) -> f64 {
        self.categories.values().map(|acc| acc.total_sales).sum()
    }
}

/// Aggregate transactions into (period, category) buckets.
#[instrument(skip_all, fields(records = records.len()))]
pub fn aggregate_sales(records: &[TransactionRecord]) -> SalesAggregate {
    let aggregate: SalesAggregate =
        fold_partitioned(records, |acc: &mut SalesAggregate, record| acc.add(record));

    info!(
        buckets = aggregate.buckets.len(),
        categories = aggregate.categories.len(),
        "sales aggregated"
    );
    aggregate
}
