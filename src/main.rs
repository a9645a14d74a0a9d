//! SalesForge: batch e-commerce analytics CLI
//!
//! Reads the transaction and interaction logs, runs the pipeline and writes
//! one CSV per artifact. With `--assign` it instead reports which segment a
//! user with the given raw features falls into.

use anyhow::{Context, Result};
use clap::Parser;
use salesforge::forecast::ForecastOutcome;
use salesforge::source::read_csv_rows;
use salesforge::{run_pipeline, Args, CsvDirSink, PipelineConfig, PipelineReport};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.pipeline_config()?;
    let start_time = Instant::now();

    let transactions = read_csv_rows(&args.transactions)
        .with_context(|| format!("reading transactions from {}", args.transactions.display()))?;
    let interactions = read_csv_rows(&args.interactions)
        .with_context(|| format!("reading interactions from {}", args.interactions.display()))?;

    let report = run_pipeline(&config, &transactions, &interactions)?;

    if let Some(values) = args.parse_feature_values()? {
        run_assign_mode(&report, &values)?;
    } else {
        let mut sink = CsvDirSink::new(&args.output)?;
        report.publish(&mut sink)?;
        summarize(&report, &config);
        info!(output = %args.output.display(), "artifacts written");
    }

    info!(elapsed_s = start_time.elapsed().as_secs_f64(), "done");
    Ok(())
}

/// Report the segment for one user's raw feature vector
fn run_assign_mode(report: &PipelineReport, values: &[f64]) -> Result<()> {
    let segmentation = report
        .segmentation
        .as_ref()
        .map_err(|e| anyhow::anyhow!("segmentation unavailable: {}", e))?;

    let cluster = segmentation.assign(values)?;
    let profile = segmentation
        .cluster_profiles()
        .into_iter()
        .find(|p| p.cluster_id == cluster)
        .context("assigned cluster has no profile")?;

    info!(
        cluster,
        size = profile.size,
        mean_features = ?profile.mean_features,
        "user assigned"
    );
    Ok(())
}

fn summarize(report: &PipelineReport, config: &PipelineConfig) {
    info!(
        accepted = report.transactions.accepted,
        rejected = report.transactions.rejected_count(),
        "transactions normalized"
    );
    info!(
        accepted = report.interactions.accepted,
        rejected = report.interactions.rejected_count(),
        "interactions normalized"
    );
    info!(
        joined = report.features.join.joined,
        excluded = report.features.join.excluded(),
        avg_page_views = ?report.features.avg_page_views_before_purchase(),
        "feature join"
    );

    for category in report.sales.top_categories().iter().take(5) {
        info!(category = %category.category, total_sales = category.total_sales, "top category");
    }

    match &report.segmentation {
        Ok(segmentation) => {
            for profile in segmentation.cluster_profiles() {
                info!(
                    cluster = profile.cluster_id,
                    size = profile.size,
                    mean_features = ?profile.mean_features,
                    "segment"
                );
            }
            info!(
                k = config.clusters,
                inertia = segmentation.model.inertia,
                silhouette = segmentation.silhouette(100),
                "segmentation quality"
            );
        }
        Err(err) => warn!("no segments: {}", err),
    }

    if let Ok(forecasts) = &report.forecasts {
        for forecast in forecasts {
            match &forecast.outcome {
                ForecastOutcome::Forecast(points) => {
                    for point in points {
                        info!(
                            category = %forecast.category,
                            period = %point.period,
                            predicted = point.predicted_value,
                            strategy = report.forecaster,
                            "forecast"
                        );
                    }
                }
                ForecastOutcome::InsufficientHistory { observed } => {
                    warn!(category = %forecast.category, observed, "insufficient history");
                }
            }
        }
    }

    for pair in report.recommendations.ranked().iter().take(5) {
        info!(a = pair.product_a, b = pair.product_b, count = pair.count, "top pair");
    }
    for page in &report.top_pages {
        info!(page = %page.page_id, views = page.views, "top page");
    }
}
