//! Per-user feature construction
//!
//! Interaction and transaction aggregates are built independently (and in
//! parallel), then inner-joined on `user_id`. Users that appear in only one
//! stream get no feature vector. The exclusion is deliberate and lossy, so it
//! is reported through [`JoinReport`]; callers that need every user must
//! pre-fill the missing side themselves.

use crate::monoid::{fold_partitioned, Monoid};
use crate::schema::{InteractionRecord, TransactionRecord};
use ndarray::Array2;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, instrument, warn};

/// Column order of [`UserFeatureVector::values`] and [`FeatureSet::matrix`]
pub const FEATURE_NAMES: [&str; 6] = [
    "order_count",
    "avg_order_value",
    "total_spend",
    "category_diversity",
    "avg_session_duration",
    "page_view_count",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Mergeable count/mean/M2 triple (Chan et al. parallel variance)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample standard deviation; undefined below two observations
    pub fn sample_std(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

impl Monoid for RunningStats {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        Self {
            count,
            mean: self.mean + delta * n_b / count as f64,
            m2: self.m2 + other.m2 + delta * delta * n_a * n_b / count as f64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct InteractionAggregate {
    session: RunningStats,
}

impl Monoid for InteractionAggregate {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(self, other: Self) -> Self {
        Self {
            session: self.session.combine(other.session),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct TransactionAggregate {
    order_count: u64,
    price_sum: f64,
    categories: BTreeSet<String>,
}

impl Monoid for TransactionAggregate {
    fn empty() -> Self {
        Self::default()
    }

    fn combine(mut self, other: Self) -> Self {
        self.order_count += other.order_count;
        self.price_sum += other.price_sum;
        self.categories.extend(other.categories);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserFeatureVector {
    pub user_id: i64,
    pub order_count: u64,
    /// Mean unit price over the user's orders
    pub avg_order_value: f64,
    /// Sum of unit prices over the user's orders
    pub total_spend: f64,
    pub category_diversity: u64,
    pub avg_session_duration: f64,
    pub page_view_count: u64,
}

impl UserFeatureVector {
    /// Numeric values in [`FEATURE_NAMES`] order
    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        [
            self.order_count as f64,
            self.avg_order_value,
            self.total_spend,
            self.category_diversity as f64,
            self.avg_session_duration,
            self.page_view_count as f64,
        ]
    }
}

/// Users dropped by the inner join, per side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub joined: usize,
    pub interaction_only: usize,
    pub transaction_only: usize,
}

impl JoinReport {
    pub fn excluded(&self) -> usize {
        self.interaction_only + self.transaction_only
    }
}

/// Joined feature vectors ordered by user_id
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub vectors: Vec<UserFeatureVector>,
    pub join: JoinReport,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.vectors.iter().map(|v| v.user_id).collect()
    }

    /// Raw (unscaled) feature matrix, one row per user
    pub fn matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.vectors.len(), FEATURE_COUNT));
        for (mut row, vector) in matrix.outer_iter_mut().zip(&self.vectors) {
            for (cell, value) in row.iter_mut().zip(vector.values()) {
                *cell = value;
            }
        }
        matrix
    }

    /// Mean page views among users who also purchased
    pub fn avg_page_views_before_purchase(&self) -> Option<f64> {
        if self.vectors.is_empty() {
            return None;
        }
        let total: u64 = self.vectors.iter().map(|v| v.page_view_count).sum();
        Some(total as f64 / self.vectors.len() as f64)
    }
}

/// Build joined per-user feature vectors.
#[instrument(skip_all, fields(interactions = interactions.len(), transactions = transactions.len()))]
pub fn build_features(
    interactions: &[InteractionRecord],
    transactions: &[TransactionRecord],
) -> FeatureSet {
    let (by_interaction, by_transaction) = rayon::join(
        || aggregate_interactions(interactions),
        || aggregate_transactions(transactions),
    );

    let mut join = JoinReport::default();
    let mut vectors = Vec::with_capacity(by_interaction.len().min(by_transaction.len()));

    for (user_id, interaction) in &by_interaction {
        let Some(purchases) = by_transaction.get(user_id) else {
            join.interaction_only += 1;
            continue;
        };
        vectors.push(UserFeatureVector {
            user_id: *user_id,
            order_count: purchases.order_count,
            avg_order_value: purchases.price_sum / purchases.order_count as f64,
            total_spend: purchases.price_sum,
            category_diversity: purchases.categories.len() as u64,
            avg_session_duration: interaction.session.mean,
            page_view_count: interaction.session.count,
        });
    }
    join.joined = vectors.len();
    join.transaction_only = by_transaction
        .keys()
        .filter(|user_id| !by_interaction.contains_key(user_id))
        .count();

    if join.excluded() > 0 {
        warn!(
            interaction_only = join.interaction_only,
            transaction_only = join.transaction_only,
            "users without both interactions and transactions excluded from features"
        );
    }
    info!(users = join.joined, "feature vectors built");

    FeatureSet { vectors, join }
}

fn aggregate_interactions(records: &[InteractionRecord]) -> BTreeMap<i64, InteractionAggregate> {
    fold_partitioned(records, |acc: &mut BTreeMap<i64, InteractionAggregate>, record| {
        acc.entry(record.user_id)
            .or_default()
            .session
            .push(record.session_duration);
    })
}

fn aggregate_transactions(records: &[TransactionRecord]) -> BTreeMap<i64, TransactionAggregate> {
    fold_partitioned(records, |acc: &mut BTreeMap<i64, TransactionAggregate>, record| {
        let entry = acc.entry(record.user_id).or_default();
        entry.order_count += 1;
        entry.price_sum += record.price as f64;
        if !entry.categories.contains(&record.category) {
            entry.categories.insert(record.category.clone());
        }
    })
}

/// Per-user session duration summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub user_id: i64,
    pub sessions: u64,
    pub mean: f64,
    pub std: Option<f64>,
}

/// Mean and sample standard deviation of session duration per user.
pub fn session_statistics(interactions: &[InteractionRecord]) -> Vec<SessionStats> {
    aggregate_interactions(interactions)
        .into_iter()
        .map(|(user_id, agg)| SessionStats {
            user_id,
            sessions: agg.session.count,
            mean: agg.session.mean,
            std: agg.session.sample_std(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEngagement {
    pub page_id: String,
    pub views: u64,
}

/// The `limit` most viewed pages; ties broken by page id.
pub fn top_pages(interactions: &[InteractionRecord], limit: usize) -> Vec<PageEngagement> {
    let counts: HashMap<String, u64> =
        fold_partitioned(interactions, |acc: &mut HashMap<String, u64>, record| {
            *acc.entry(record.page_id.clone()).or_insert(0) += 1;
        });

    let mut ranked: Vec<PageEngagement> = counts
        .into_iter()
        .map(|(page_id, views)| PageEngagement { page_id, views })
        .collect();
    ranked.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.page_id.cmp(&b.page_id)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DeviceType;
    use chrono::{TimeZone, Utc};

    fn interaction(user_id: i64, page: &str, duration: f64) -> InteractionRecord {
        InteractionRecord {
            user_id,
            page_id: page.to_string(),
            session_duration: duration,
            device_type: DeviceType::Desktop,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn transaction(order_id: i64, user_id: i64, price: f32, category: &str) -> TransactionRecord {
        TransactionRecord {
            order_id,
            user_id,
            product_id: 1,
            quantity: 1,
            price,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_inner_join_keeps_shared_users_only() {
        let interactions = vec![interaction(1, "a", 10.0), interaction(2, "b", 20.0)];
        let transactions = vec![transaction(1, 2, 5.0, "Books"), transaction(2, 3, 8.0, "Toys")];

        let features = build_features(&interactions, &transactions);

        assert_eq!(features.user_ids(), vec![2]);
        assert_eq!(
            features.join,
            JoinReport {
                joined: 1,
                interaction_only: 1,
                transaction_only: 1
            }
        );
    }

    #[test]
    fn test_feature_values() {
        let interactions = vec![
            interaction(1, "a", 10.0),
            interaction(1, "b", 30.0),
            interaction(1, "a", 20.0),
        ];
        let transactions = vec![
            transaction(1, 1, 10.0, "Books"),
            transaction(2, 1, 30.0, "Books"),
            transaction(3, 1, 20.0, "Toys"),
        ];

        let features = build_features(&interactions, &transactions);
        let v = &features.vectors[0];

        assert_eq!(v.order_count, 3);
        assert_eq!(v.total_spend, 60.0);
        assert_eq!(v.avg_order_value, 20.0);
        assert_eq!(v.category_diversity, 2);
        assert_eq!(v.avg_session_duration, 20.0);
        assert_eq!(v.page_view_count, 3);
        assert_eq!(features.matrix().shape(), &[1, FEATURE_COUNT]);
        assert_eq!(features.avg_page_views_before_purchase(), Some(3.0));
    }

    #[test]
    fn test_running_stats_combine() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut whole = RunningStats::default();
        values.iter().for_each(|v| whole.push(*v));

        let mut left = RunningStats::default();
        let mut right = RunningStats::default();
        values[..3].iter().for_each(|v| left.push(*v));
        values[3..].iter().for_each(|v| right.push(*v));
        let merged = left.combine(right);

        assert_eq!(merged.count, 8);
        assert!((merged.mean - 5.0).abs() < 1e-12);
        assert!((merged.sample_std().unwrap() - whole.sample_std().unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_session_statistics_single_session_has_no_std() {
        let stats = session_statistics(&[interaction(4, "a", 12.0)]);
        assert_eq!(stats[0].sessions, 1);
        assert_eq!(stats[0].std, None);
    }

    #[test]
    fn test_top_pages_ranking() {
        let interactions = vec![
            interaction(1, "home", 1.0),
            interaction(2, "cart", 1.0),
            interaction(3, "home", 1.0),
            interaction(4, "about", 1.0),
            interaction(5, "cart", 1.0),
            interaction(6, "home", 1.0),
        ];
        let top = top_pages(&interactions, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], PageEngagement { page_id: "home".into(), views: 3 });
        assert_eq!(top[1], PageEngagement { page_id: "cart".into(), views: 2 });
    }
}
