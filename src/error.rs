//! Error types for pipeline stages

use thiserror::Error;

/// Failures that abort a stage or the whole run.
///
/// Row-level data quality problems never surface here; they are counted in a
/// [`NormalizeReport`](crate::schema::NormalizeReport) instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Insufficient data for {stage}: need at least {required}, got {available}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        available: usize,
    },

    #[error("Clustering failed: {message}")]
    Clustering { message: String },

    #[error("Forecast model failed: {message}")]
    Forecast { message: String },

    #[error("Table error: {0}")]
    Table(#[from] polars::prelude::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }

    /// Whether the failure is confined to one stage, leaving the other
    /// artifacts of the run usable.
    pub fn is_stage_local(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientData { .. }
                | PipelineError::Clustering { .. }
                | PipelineError::Forecast { .. }
        )
    }

    /// Stable code for log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Configuration { .. } => "CONFIGURATION_ERROR",
            PipelineError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            PipelineError::Clustering { .. } => "CLUSTERING_ERROR",
            PipelineError::Forecast { .. } => "FORECAST_ERROR",
            PipelineError::Table(_) => "TABLE_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
        }
    }
}
