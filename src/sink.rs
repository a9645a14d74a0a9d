//! Artifact tables and the sinks that receive them
//!
//! Every artifact is handed over as a polars `DataFrame`; what the sink does
//! with it (keep it in memory, write CSV, ...) is up to the sink.

use crate::aggregate::{CategoryTotal, TimeCategoryBucket};
use crate::features::{FeatureSet, PageEngagement, SessionStats, FEATURE_COUNT, FEATURE_NAMES};
use crate::forecast::{CategoryForecast, ForecastOutcome};
use crate::recommend::ProductPairCount;
use crate::segment::SegmentAssignment;
use crate::tiers::UserTier;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

/// The tables a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    Sales,
    TopCategories,
    Segments,
    Forecasts,
    Recommendations,
    ValueTiers,
    SessionStats,
    TopPages,
    TopProducts,
}

impl Artifact {
    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Sales => "monthly_category_sales",
            Artifact::TopCategories => "top_categories",
            Artifact::Segments => "user_segments",
            Artifact::Forecasts => "sales_forecast",
            Artifact::Recommendations => "product_pairs",
            Artifact::ValueTiers => "user_value_tiers",
            Artifact::SessionStats => "session_statistics",
            Artifact::TopPages => "top_pages",
            Artifact::TopProducts => "top_products_by_category",
        }
    }
}

pub trait ArtifactSink {
    fn accept(&mut self, artifact: Artifact, table: DataFrame) -> crate::Result<()>;
}

/// Keeps every table in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: BTreeMap<Artifact, DataFrame>,
}

impl ArtifactSink for MemorySink {
    fn accept(&mut self, artifact: Artifact, table: DataFrame) -> crate::Result<()> {
        self.tables.insert(artifact, table);
        Ok(())
    }
}

/// Writes `<dir>/<artifact name>.csv`
#[derive(Debug, Clone)]
pub struct CsvDirSink {
    dir: PathBuf,
}

impl CsvDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl ArtifactSink for CsvDirSink {
    fn accept(&mut self, artifact: Artifact, mut table: DataFrame) -> crate::Result<()> {
        let path = self.dir.join(format!("{}.csv", artifact.name()));
        let mut file = File::create(&path)?;
        CsvWriter::new(&mut file).finish(&mut table)?;
        info!(path = %path.display(), rows = table.height(), "artifact written");
        Ok(())
    }
}

/// (year, month, category, total_sales, order_count)
pub fn sales_table(buckets: &[TimeCategoryBucket]) -> PolarsResult<DataFrame> {
    df!(
        "year" => buckets.iter().map(|b| b.period.year).collect::<Vec<i32>>(),
        "month" => buckets.iter().map(|b| b.period.month).collect::<Vec<u32>>(),
        "category" => buckets.iter().map(|b| b.category.clone()).collect::<Vec<String>>(),
        "total_sales" => buckets.iter().map(|b| b.total_sales).collect::<Vec<f64>>(),
        "order_count" => buckets.iter().map(|b| b.order_count).collect::<Vec<u64>>()
    )
}

pub fn top_categories_table(totals: &[CategoryTotal]) -> PolarsResult<DataFrame> {
    df!(
        "category" => totals.iter().map(|t| t.category.clone()).collect::<Vec<String>>(),
        "total_sales" => totals.iter().map(|t| t.total_sales).collect::<Vec<f64>>(),
        "order_count" => totals.iter().map(|t| t.order_count).collect::<Vec<u64>>()
    )
}

/// (user_id, cluster_id) plus the raw feature columns when `features` is given
pub fn segments_table(
    assignments: &[SegmentAssignment],
    features: Option<&FeatureSet>,
) -> PolarsResult<DataFrame> {
    let mut table = df!(
        "user_id" => assignments.iter().map(|a| a.user_id).collect::<Vec<i64>>(),
        "cluster_id" => assignments.iter().map(|a| a.cluster_id as u32).collect::<Vec<u32>>()
    )?;

    if let Some(features) = features {
        let by_user: BTreeMap<i64, [f64; FEATURE_COUNT]> = features
            .vectors
            .iter()
            .map(|v| (v.user_id, v.values()))
            .collect();
        for (column, name) in FEATURE_NAMES.iter().enumerate() {
            let values: Vec<Option<f64>> = assignments
                .iter()
                .map(|a| by_user.get(&a.user_id).map(|row| row[column]))
                .collect();
            table.with_column(Series::new(*name, values))?;
        }
    }
    Ok(table)
}

/// One row per forecast point; categories without enough history get a
/// single row with null prediction and status `insufficient-history`.
pub fn forecast_table(forecasts: &[CategoryForecast], strategy: &str) -> PolarsResult<DataFrame> {
    let mut category = Vec::new();
    let mut period = Vec::new();
    let mut period_index = Vec::new();
    let mut predicted = Vec::new();
    let mut status = Vec::new();

    for forecast in forecasts {
        match &forecast.outcome {
            ForecastOutcome::Forecast(points) => {
                for point in points {
                    category.push(forecast.category.clone());
                    period.push(Some(point.period.to_string()));
                    period_index.push(Some(point.period_index));
                    predicted.push(Some(point.predicted_value));
                    status.push("ok".to_string());
                }
            }
            ForecastOutcome::InsufficientHistory { .. } => {
                category.push(forecast.category.clone());
                period.push(None);
                period_index.push(None);
                predicted.push(None);
                status.push("insufficient-history".to_string());
            }
        }
    }
    let strategy_used = vec![strategy.to_string(); category.len()];

    df!(
        "category" => category,
        "period" => period,
        "period_index" => period_index,
        "predicted_value" => predicted,
        "strategy_used" => strategy_used,
        "status" => status
    )
}

/// Pairs in the order given (callers pass them ranked by count)
pub fn recommendations_table(pairs: &[ProductPairCount]) -> PolarsResult<DataFrame> {
    df!(
        "product_a" => pairs.iter().map(|p| p.product_a).collect::<Vec<i64>>(),
        "product_b" => pairs.iter().map(|p| p.product_b).collect::<Vec<i64>>(),
        "count" => pairs.iter().map(|p| p.count).collect::<Vec<u64>>()
    )
}

pub fn tiers_table(tiers: &[UserTier]) -> PolarsResult<DataFrame> {
    df!(
        "user_id" => tiers.iter().map(|t| t.summary.user_id).collect::<Vec<i64>>(),
        "total_orders" => tiers.iter().map(|t| t.summary.total_orders).collect::<Vec<u64>>(),
        "total_spent" => tiers.iter().map(|t| t.summary.total_spent).collect::<Vec<f64>>(),
        "avg_order_value" => tiers.iter().map(|t| t.summary.avg_order_value).collect::<Vec<f64>>(),
        "user_segment" => tiers.iter().map(|t| t.tier.clone()).collect::<Vec<String>>()
    )
}

/// Per-user session duration statistics; `std_session_duration` is null
/// for users with a single session.
pub fn session_stats_table(stats: &[SessionStats]) -> PolarsResult<DataFrame> {
    df!(
        "user_id" => stats.iter().map(|s| s.user_id).collect::<Vec<i64>>(),
        "sessions" => stats.iter().map(|s| s.sessions).collect::<Vec<u64>>(),
        "mean_session_duration" => stats.iter().map(|s| s.mean).collect::<Vec<f64>>(),
        "std_session_duration" => stats.iter().map(|s| s.std).collect::<Vec<Option<f64>>>()
    )
}

pub fn top_pages_table(pages: &[PageEngagement]) -> PolarsResult<DataFrame> {
    df!(
        "page_id" => pages.iter().map(|p| p.page_id.clone()).collect::<Vec<String>>(),
        "views" => pages.iter().map(|p| p.views).collect::<Vec<u64>>()
    )
}

/// (category, product_id, purchases), one row per category
pub fn top_products_table(top: &BTreeMap<String, (i64, u64)>) -> PolarsResult<DataFrame> {
    df!(
        "category" => top.keys().cloned().collect::<Vec<String>>(),
        "product_id" => top.values().map(|(id, _)| *id).collect::<Vec<i64>>(),
        "purchases" => top.values().map(|(_, n)| *n).collect::<Vec<u64>>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Period;
    use crate::forecast::ForecastPoint;

    #[test]
    fn test_sales_table_shape() {
        let buckets = vec![TimeCategoryBucket {
            period: Period::new(2024, 2),
            category: "Books".into(),
            total_sales: 12.5,
            order_count: 3,
        }];
        let table = sales_table(&buckets).unwrap();
        assert_eq!(table.shape(), (1, 5));
        assert_eq!(
            table.get_column_names(),
            vec!["year", "month", "category", "total_sales", "order_count"]
        );
    }

    #[test]
    fn test_forecast_table_marks_insufficient_history() {
        let forecasts = vec![
            CategoryForecast {
                category: "Books".into(),
                outcome: ForecastOutcome::Forecast(vec![ForecastPoint {
                    category: "Books".into(),
                    period_index: 3,
                    period: Period::new(2024, 4),
                    predicted_value: 10.0,
                    strategy: "moving-average",
                }]),
            },
            CategoryForecast {
                category: "Toys".into(),
                outcome: ForecastOutcome::InsufficientHistory { observed: 1 },
            },
        ];
        let table = forecast_table(&forecasts, "moving-average").unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.column("predicted_value").unwrap().null_count(), 1);
    }

    #[test]
    fn test_session_stats_table_keeps_missing_std_null() {
        let stats = vec![
            SessionStats { user_id: 1, sessions: 2, mean: 75.0, std: Some(63.6) },
            SessionStats { user_id: 2, sessions: 1, mean: 15.0, std: None },
        ];
        let table = session_stats_table(&stats).unwrap();
        assert_eq!(table.shape(), (2, 4));
        assert_eq!(table.column("std_session_duration").unwrap().null_count(), 1);
    }

    #[test]
    fn test_top_products_table_rows_follow_category_order() {
        let top: BTreeMap<String, (i64, u64)> = [
            ("Electronics".to_string(), (101, 3)),
            ("Books".to_string(), (102, 2)),
        ]
        .into_iter()
        .collect();
        let table = top_products_table(&top).unwrap();
        let categories: Vec<Option<&str>> = table.column("category").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(categories, vec![Some("Books"), Some("Electronics")]);
    }

    #[test]
    fn test_memory_sink_keeps_tables() {
        let mut sink = MemorySink::default();
        let table = recommendations_table(&[ProductPairCount {
            product_a: 1,
            product_b: 2,
            count: 4,
        }])
        .unwrap();
        sink.accept(Artifact::Recommendations, table).unwrap();
        assert_eq!(sink.tables[&Artifact::Recommendations].height(), 1);
    }
}
