//! End-to-end batch run
//!
//! ```text
//!  raw transactions ──┐                 ┌─> aggregate ──> forecast
//!                     ├─> normalize ────┼─> features ───> segment
//!  raw interactions ──┘                 ├─> pair mining
//!                                       └─> value tiers
//! ```
//!
//! Configuration is validated before any row is touched. After normalization
//! the terminal stages run concurrently; a stage whose own precondition fails
//! (too few users, too little history) reports its error in the result while
//! the other artifacts are still produced.

use crate::aggregate::{aggregate_sales, SalesAggregate};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{build_features, session_statistics, top_pages, FeatureSet, PageEngagement, SessionStats};
use crate::forecast::{CategoryForecast, Forecaster};
use crate::recommend::{mine_pairs, top_product_by_category, MinerParams, NestedLoopCounter, PairCounts};
use crate::schema::{normalize_interactions, normalize_transactions, NormalizeReport, RawRow};
use crate::segment::{segment_users, SegmentParams, Segmentation};
use crate::sink::{self, Artifact, ArtifactSink};
use crate::tiers::{classify_users, TierTable, UserTier};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Everything one run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub transactions: NormalizeReport,
    pub interactions: NormalizeReport,
    pub sales: SalesAggregate,
    pub features: FeatureSet,
    pub segmentation: Result<Segmentation, PipelineError>,
    pub forecaster: &'static str,
    pub forecasts: Result<Vec<CategoryForecast>, PipelineError>,
    pub recommendations: PairCounts,
    pub tiers: Vec<UserTier>,
    pub session_stats: Vec<SessionStats>,
    pub top_pages: Vec<PageEngagement>,
    pub top_products: BTreeMap<String, (i64, u64)>,
}

/// Run every stage over the raw rows of both logs.
#[instrument(skip_all, fields(transactions = transactions.len(), interactions = interactions.len()))]
pub fn run_pipeline(
    config: &PipelineConfig,
    transactions: &[RawRow],
    interactions: &[RawRow],
) -> crate::Result<PipelineReport> {
    config.validate()?;
    let started = Instant::now();

    let (orders, clicks) = rayon::join(
        || normalize_transactions(transactions),
        || normalize_interactions(interactions),
    );

    let forecaster = Forecaster::from_config(config);
    let segment_params = SegmentParams::from(config);
    let miner_params = MinerParams::from(config);
    let tier_table = TierTable::default();

    let ((sales, forecasts), ((features, segmentation), (recommendations, tiers))) = rayon::join(
        || {
            let sales = aggregate_sales(&orders.records);
            let forecasts = forecaster.forecast_all(&sales);
            (sales, forecasts)
        },
        || {
            rayon::join(
                || {
                    let features = build_features(&clicks.records, &orders.records);
                    let segmentation = segment_users(&features, &segment_params);
                    (features, segmentation)
                },
                || {
                    (
                        mine_pairs(&orders.records, &NestedLoopCounter, &miner_params),
                        classify_users(&orders.records, &tier_table),
                    )
                },
            )
        },
    );

    if let Err(err) = &segmentation {
        warn!(code = err.error_code(), "segmentation skipped: {}", err);
    }
    if let Err(err) = &forecasts {
        warn!(code = err.error_code(), "forecasting failed: {}", err);
    }

    let report = PipelineReport {
        transactions: orders.report,
        interactions: clicks.report,
        session_stats: session_statistics(&clicks.records),
        top_pages: top_pages(&clicks.records, config.top_pages),
        top_products: top_product_by_category(&orders.records),
        sales,
        features,
        segmentation,
        forecaster: forecaster.strategy_name(),
        forecasts,
        recommendations,
        tiers,
    };
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "pipeline complete");
    Ok(report)
}

impl PipelineReport {
    /// Hand every available artifact to `sink`; failed stages are skipped.
    pub fn publish(&self, sink: &mut dyn ArtifactSink) -> crate::Result<()> {
        sink.accept(Artifact::Sales, sink::sales_table(&self.sales.buckets())?)?;
        sink.accept(
            Artifact::TopCategories,
            sink::top_categories_table(&self.sales.top_categories())?,
        )?;
        if let Ok(segmentation) = &self.segmentation {
            sink.accept(
                Artifact::Segments,
                sink::segments_table(&segmentation.assignments, Some(&self.features))?,
            )?;
        }
        if let Ok(forecasts) = &self.forecasts {
            sink.accept(
                Artifact::Forecasts,
                sink::forecast_table(forecasts, self.forecaster)?,
            )?;
        }
        sink.accept(
            Artifact::Recommendations,
            sink::recommendations_table(&self.recommendations.ranked())?,
        )?;
        sink.accept(Artifact::ValueTiers, sink::tiers_table(&self.tiers)?)?;
        sink.accept(
            Artifact::SessionStats,
            sink::session_stats_table(&self.session_stats)?,
        )?;
        sink.accept(Artifact::TopPages, sink::top_pages_table(&self.top_pages)?)?;
        sink.accept(
            Artifact::TopProducts,
            sink::top_products_table(&self.top_products)?,
        )?;
        Ok(())
    }
}
