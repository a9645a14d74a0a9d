//! Pipeline configuration and fail-fast validation

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which forecasting strategy the Forecaster runs for every category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Random forest regression over the period index
    ModelBased,
    /// Trailing-window mean of total sales
    MovingAverage,
}

/// Configuration for a full pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of K-Means clusters
    pub clusters: usize,
    /// Seed shared by K-Means initialization and forest bootstrapping
    pub seed: u64,
    /// Maximum K-Means iterations
    pub max_iters: u64,
    /// K-Means convergence tolerance
    pub tolerance: f64,
    pub strategy: StrategyKind,
    /// Trailing window width for the moving-average strategy
    pub window: usize,
    /// Forecast steps for the moving-average strategy
    pub horizon: usize,
    /// Trees in the random forest
    pub n_trees: usize,
    /// Depth limit for each forest tree; unlimited when absent
    pub max_depth: Option<u16>,
    /// Keep at most this many most recent purchases per user when mining pairs
    pub max_user_history: Option<usize>,
    /// How many pages the engagement ranking keeps
    pub top_pages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            seed: 42,
            max_iters: 300,
            tolerance: 1e-4,
            strategy: StrategyKind::ModelBased,
            window: 3,
            horizon: 1,
            n_trees: 100,
            max_depth: None,
            max_user_history: None,
            top_pages: 10,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::config(format!(
                "invalid config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Reject structurally invalid settings before any computation starts.
    pub fn validate(&self) -> crate::Result<()> {
        if self.clusters < 2 {
            return Err(PipelineError::config(format!(
                "cluster count must be at least 2, got {}",
                self.clusters
            )));
        }
        if self.max_iters == 0 {
            return Err(PipelineError::config("max_iters must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(PipelineError::config(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        if self.window == 0 {
            return Err(PipelineError::config("moving-average window must be positive"));
        }
        if self.horizon == 0 {
            return Err(PipelineError::config("forecast horizon must be positive"));
        }
        if self.n_trees == 0 {
            return Err(PipelineError::config("forest must contain at least one tree"));
        }
        if self.max_depth == Some(0) {
            return Err(PipelineError::config("max_depth must be positive when set"));
        }
        if let Some(cap) = self.max_user_history {
            if cap < 2 {
                return Err(PipelineError::config(format!(
                    "max_user_history must allow at least one pair, got {}",
                    cap
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clusters, 4);
        assert_eq!(config.window, 3);
    }

    #[test]
    fn test_invalid_settings_fail_fast() {
        let cases = [
            PipelineConfig { clusters: 1, ..Default::default() },
            PipelineConfig { window: 0, ..Default::default() },
            PipelineConfig { horizon: 0, ..Default::default() },
            PipelineConfig { n_trees: 0, ..Default::default() },
            PipelineConfig { tolerance: -1.0, ..Default::default() },
            PipelineConfig { max_depth: Some(0), ..Default::default() },
            PipelineConfig { max_user_history: Some(1), ..Default::default() },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PipelineError::Configuration { .. }), "{:?}", config);
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"clusters": 5, "strategy": "moving-average"}"#).unwrap();
        assert_eq!(config.clusters, 5);
        assert_eq!(config.strategy, StrategyKind::MovingAverage);
        assert_eq!(config.seed, 42);
    }
}
