//! SalesForge: batch analytics over e-commerce transaction and clickstream logs
//!
//! The pipeline normalizes raw rows, then derives four artifacts:
//! monthly sales per category, K-Means user segments, per-category sales
//! forecasts and product co-occurrence counts. Every reduction is expressed as
//! a mergeable [`monoid::Monoid`] so stages can run partitioned without
//! changing results.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod monoid;
pub mod pipeline;
pub mod recommend;
pub mod schema;
pub mod segment;
pub mod sink;
pub mod source;
pub mod tiers;

// Re-export public items for easier access
pub use aggregate::{aggregate_sales, Period, SalesAggregate, TimeCategoryBucket};
pub use cli::Args;
pub use config::{PipelineConfig, StrategyKind};
pub use error::PipelineError;
pub use features::{build_features, FeatureSet, JoinReport, UserFeatureVector};
pub use forecast::{
    CategoryForecast, ForecastOutcome, ForecastPoint, ForecastStrategy, Forecaster, ModelBased,
    MovingAverage,
};
pub use pipeline::{run_pipeline, PipelineReport};
pub use recommend::{mine_pairs, MinerParams, NestedLoopCounter, PairCounter, PairCounts, ProductPairCount};
pub use schema::{normalize_interactions, normalize_transactions, RawRow, RawValue};
pub use segment::{segment_users, SegmentAssignment, SegmentParams, Segmentation};
pub use sink::{Artifact, ArtifactSink, CsvDirSink, MemorySink};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, PipelineError>;
