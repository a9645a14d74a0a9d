//! Command-line interface definitions and argument parsing

use crate::config::{PipelineConfig, StrategyKind};
use crate::features::FEATURE_COUNT;
use clap::Parser;
use std::path::PathBuf;

/// Batch e-commerce analytics: sales trends, user segments, forecasts and product pairs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transactions CSV file
    #[arg(short, long, default_value = "sales_data.csv")]
    pub transactions: PathBuf,

    /// Path to the user interactions CSV file
    #[arg(short, long, default_value = "user_interactions.csv")]
    pub interactions: PathBuf,

    /// Directory receiving one CSV per artifact
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// JSON config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Seed for K-Means initialization and forest bootstrapping
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<u64>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Forecasting strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Moving-average window width
    #[arg(long)]
    pub window: Option<usize>,

    /// Moving-average forecast steps
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Trees in the forecasting forest
    #[arg(long)]
    pub trees: Option<usize>,

    /// Cap on purchases per user considered for product pairs
    #[arg(long)]
    pub max_user_history: Option<usize>,

    /// Assign mode: raw feature values of one user as a comma-separated string
    /// in the order order_count,avg_order_value,total_spend,category_diversity,
    /// avg_session_duration,page_view_count
    #[arg(short, long)]
    pub assign: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Defaults, then the config file, then explicit flags; validated.
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(clusters) = self.clusters {
            config.clusters = clusters;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(max_iters) = self.max_iters {
            config.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if let Some(trees) = self.trees {
            config.n_trees = trees;
        }
        if self.max_user_history.is_some() {
            config.max_user_history = self.max_user_history;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse the feature values given to `--assign`
    pub fn parse_feature_values(&self) -> anyhow::Result<Option<Vec<f64>>> {
        let Some(ref assign_str) = self.assign else {
            return Ok(None);
        };

        let parts: Vec<&str> = assign_str.split(',').collect();
        if parts.len() != FEATURE_COUNT {
            anyhow::bail!(
                "Assign values must be {} comma-separated numbers, got {}",
                FEATURE_COUNT,
                parts.len()
            );
        }

        let values = parts
            .iter()
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid feature value: {}", part))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["salesforge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = args(&["-k", "5", "--strategy", "moving-average", "--window", "6"])
            .pipeline_config()
            .unwrap();
        assert_eq!(config.clusters, 5);
        assert_eq!(config.strategy, StrategyKind::MovingAverage);
        assert_eq!(config.window, 6);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_invalid_flag_values_fail_fast() {
        assert!(args(&["--window", "0"]).pipeline_config().is_err());
        assert!(args(&["-k", "1"]).pipeline_config().is_err());
    }

    #[test]
    fn test_parse_feature_values() {
        let mut parsed = args(&["--assign", "3, 20.5, 61.5, 2, 40, 12"]);
        assert_eq!(
            parsed.parse_feature_values().unwrap(),
            Some(vec![3.0, 20.5, 61.5, 2.0, 40.0, 12.0])
        );

        parsed.assign = None;
        assert_eq!(parsed.parse_feature_values().unwrap(), None);

        parsed.assign = Some("1,2".to_string());
        assert!(parsed.parse_feature_values().is_err());

        parsed.assign = Some("1,2,3,4,5,x".to_string());
        assert!(parsed.parse_feature_values().is_err());
    }
}
