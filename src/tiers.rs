//! Rule-based customer value tiers
//!
//! Tiers are an ordered table of `(predicate, label)` rules evaluated top to
//! bottom; the first rule a user satisfies names the tier. Predicates are
//! plain data, so a table can be loaded from JSON and swapped without touching
//! the classifier.

use crate::monoid::{fold_partitioned, Monoid};
use crate::schema::TransactionRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-user purchase totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPurchaseSummary {
    pub user_id: i64,
    pub total_orders: u64,
    /// Sum of price × quantity
    pub total_spent: f64,
    /// Mean unit price
    pub avg_order_value: f64,
}

/// Condition over a purchase summary; comparisons are strict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPredicate {
    SpentAbove(f64),
    OrdersAbove(u64),
    AvgOrderValueAbove(f64),
    All(Vec<TierPredicate>),
    Any(Vec<TierPredicate>),
}

impl TierPredicate {
    pub fn holds(&self, summary: &UserPurchaseSummary) -> bool {
        match self {
            TierPredicate::SpentAbove(amount) => summary.total_spent > *amount,
            TierPredicate::OrdersAbove(count) => summary.total_orders > *count,
            TierPredicate::AvgOrderValueAbove(amount) => summary.avg_order_value > *amount,
            TierPredicate::All(clauses) => clauses.iter().all(|c| c.holds(summary)),
            TierPredicate::Any(clauses) => clauses.iter().any(|c| c.holds(summary)),
        }
    }
}

/// One `(predicate, label)` row of a tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub label: String,
    pub predicate: TierPredicate,
}

impl TierRule {
    pub fn new(label: &str, predicate: TierPredicate) -> Self {
        Self {
            label: label.to_string(),
            predicate,
        }
    }

    /// Spent more than `min_spent` and placed more than `min_orders` orders
    pub fn thresholds(label: &str, min_spent: f64, min_orders: u64) -> Self {
        Self::new(
            label,
            TierPredicate::All(vec![
                TierPredicate::SpentAbove(min_spent),
                TierPredicate::OrdersAbove(min_orders),
            ]),
        )
    }

    pub fn matches(&self, summary: &UserPurchaseSummary) -> bool {
        self.predicate.holds(summary)
    }
}

/// Ordered rules plus the label used when none match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub rules: Vec<TierRule>,
    pub fallback: String,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            rules: vec![
                TierRule::thresholds("High-Value", 5000.0, 10),
                TierRule::thresholds("Medium-Value", 1000.0, 5),
            ],
            fallback: "Low-Value".to_string(),
        }
    }
}

impl TierTable {
    pub fn classify(&self, summary: &UserPurchaseSummary) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(summary))
            .map(|rule| rule.label.as_str())
            .unwrap_or(&self.fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTier {
    pub summary: UserPurchaseSummary,
    pub tier: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PurchaseAccumulator {
    orders: u64,
    spent: f64,
    price_sum: f64,
}

impl Monoid for PurchaseAccumulator {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        Self {
            orders: self.orders + other.orders,
            spent: self.spent + other.spent,
            price_sum: self.price_sum + other.price_sum,
        }
    }
}

/// Summarize purchases per user, ordered by user_id.
pub fn summarize_purchases(records: &[TransactionRecord]) -> Vec<UserPurchaseSummary> {
    let per_user: BTreeMap<i64, PurchaseAccumulator> =
        fold_partitioned(records, |acc: &mut BTreeMap<i64, PurchaseAccumulator>, record| {
            let entry = acc.entry(record.user_id).or_default();
            entry.orders += 1;
            entry.spent += record.line_total();
            entry.price_sum += record.price as f64;
        });

    per_user
        .into_iter()
        .map(|(user_id, acc)| UserPurchaseSummary {
            user_id,
            total_orders: acc.orders,
            total_spent: acc.spent,
            avg_order_value: acc.price_sum / acc.orders as f64,
        })
        .collect()
}

/// Classify every purchasing user against `table`.
pub fn classify_users(records: &[TransactionRecord], table: &TierTable) -> Vec<UserTier> {
    summarize_purchases(records)
        .into_iter()
        .map(|summary| UserTier {
            tier: table.classify(&summary).to_string(),
            summary,
        })
        .collect()
}
