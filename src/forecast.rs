//! Per-category sales forecasting behind a pluggable strategy
//!
//! A [`Forecaster`] owns one [`ForecastStrategy`] and applies it to every
//! category's bucket history independently. Categories with fewer than
//! [`MIN_HISTORY`] buckets yield [`ForecastOutcome::InsufficientHistory`]
//! instead of a fabricated value.

use crate::aggregate::{Period, SalesAggregate, TimeCategoryBucket};
use crate::config::{PipelineConfig, StrategyKind};
use crate::error::PipelineError;
use rayon::prelude::*;
use serde::Serialize;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::collections::VecDeque;
use tracing::{debug, info, instrument};

/// Fewest observed buckets either strategy will forecast from
pub const MIN_HISTORY: usize = 2;

/// One observed point of a category series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    /// Months since the category's first observed bucket
    pub period_index: i64,
    pub value: f64,
}

/// Predicted value at a future period index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub period_index: i64,
    pub value: f64,
}

/// A forecasting method over one ordered series
pub trait ForecastStrategy: Send + Sync {
    /// Label written to the forecast table
    fn name(&self) -> &'static str;

    /// Forecast the periods after the last history point.
    ///
    /// `history` is ordered by period index and is never empty.
    fn forecast(&self, history: &[HistoryPoint]) -> crate::Result<Vec<Prediction>>;
}

/// Forest settings for the model-based strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Unlimited when absent
    pub max_depth: Option<u16>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn regressor_parameters(&self) -> RandomForestRegressorParameters {
        let parameters = RandomForestRegressorParameters::default()
            .with_n_trees(self.n_trees)
            .with_seed(self.seed);
        match self.max_depth {
            Some(depth) => parameters.with_max_depth(depth),
            None => parameters,
        }
    }
}

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Random forest over the period index, predicting the next period only
#[derive(Debug, Clone, Default)]
pub struct ModelBased {
    pub params: ForestParams,
}

impl ForecastStrategy for ModelBased {
    fn name(&self) -> &'static str {
        "model-based"
    }

    fn forecast(&self, history: &[HistoryPoint]) -> crate::Result<Vec<Prediction>> {
        ensure_history(history)?;

        let records: Vec<Vec<f64>> = history
            .iter()
            .map(|point| vec![point.period_index as f64])
            .collect();
        let targets: Vec<f64> = history.iter().map(|point| point.value).collect();

        let forest = Forest::fit(
            &DenseMatrix::from_2d_vec(&records),
            &targets,
            self.params.regressor_parameters(),
        )
        .map_err(|e| PipelineError::Forecast {
            message: e.to_string(),
        })?;

        let next = history[history.len() - 1].period_index + 1;
        let predicted = forest
            .predict(&DenseMatrix::from_2d_vec(&vec![vec![next as f64]]))
            .map_err(|e| PipelineError::Forecast {
                message: e.to_string(),
            })?;
        let value = predicted.first().copied().ok_or_else(|| PipelineError::Forecast {
            message: "regressor returned no prediction".into(),
        })?;

        Ok(vec![Prediction {
            period_index: next,
            value,
        }])
    }
}

/// Trailing-window mean; each step feeds its forecast back into the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovingAverage {
    pub window: usize,
    pub horizon: usize,
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self { window: 3, horizon: 1 }
    }
}

impl ForecastStrategy for MovingAverage {
    fn name(&self) -> &'static str {
        "moving-average"
    }

    fn forecast(&self, history: &[HistoryPoint]) -> crate::Result<Vec<Prediction>> {
        ensure_history(history)?;
        if self.window == 0 || self.horizon == 0 {
            return Err(PipelineError::config("moving-average window and horizon must be positive"));
        }

        let start = history.len().saturating_sub(self.window);
        let mut window: VecDeque<f64> = history[start..].iter().map(|p| p.value).collect();
        let mut period_index = history[history.len() - 1].period_index;
        let mut predictions = Vec::with_capacity(self.horizon);

        for _ in 0..self.horizon {
            let value = window.iter().sum::<f64>() / window.len() as f64;
            period_index += 1;
            predictions.push(Prediction { period_index, value });

            if window.len() == self.window {
                window.pop_front();
            }
            window.push_back(value);
        }

        Ok(predictions)
    }
}

fn ensure_history(history: &[HistoryPoint]) -> crate::Result<()> {
    if history.len() < MIN_HISTORY {
        return Err(PipelineError::InsufficientData {
            stage: "forecast",
            required: MIN_HISTORY,
            available: history.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub category: String,
    pub period_index: i64,
    /// Calendar month the index refers to
    pub period: Period,
    pub predicted_value: f64,
    pub strategy: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForecastOutcome {
    Forecast(Vec<ForecastPoint>),
    InsufficientHistory { observed: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryForecast {
    pub category: String,
    pub outcome: ForecastOutcome,
}

/// Runs one strategy across all categories
pub struct Forecaster {
    strategy: Box<dyn ForecastStrategy>,
}

impl Forecaster {
    pub fn new(strategy: Box<dyn ForecastStrategy>) -> Self {
        Self { strategy }
    }

    /// Build the strategy the config selects
    pub fn from_config(config: &PipelineConfig) -> Self {
        let strategy: Box<dyn ForecastStrategy> = match config.strategy {
            StrategyKind::ModelBased => Box::new(ModelBased {
                params: ForestParams {
                    n_trees: config.n_trees,
                    max_depth: config.max_depth,
                    seed: config.seed,
                },
            }),
            StrategyKind::MovingAverage => Box::new(MovingAverage {
                window: config.window,
                horizon: config.horizon,
            }),
        };
        Self::new(strategy)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Forecast one category from its buckets (any order).
    pub fn forecast_category(
        &self,
        category: &str,
        buckets: &[TimeCategoryBucket],
    ) -> crate::Result<CategoryForecast> {
        let mut ordered: Vec<&TimeCategoryBucket> = buckets.iter().collect();
        ordered.sort_by_key(|bucket| bucket.period);

        let Some(origin) = ordered.first().map(|bucket| bucket.period) else {
            return Ok(CategoryForecast {
                category: category.to_string(),
                outcome: ForecastOutcome::InsufficientHistory { observed: 0 },
            });
        };
        let history: Vec<HistoryPoint> = ordered
            .iter()
            .map(|bucket| HistoryPoint {
                period_index: bucket.period.months_since(origin),
                value: bucket.total_sales,
            })
            .collect();

        let outcome = match self.strategy.forecast(&history) {
            Ok(predictions) => ForecastOutcome::Forecast(
                predictions
                    .into_iter()
                    .map(|prediction| ForecastPoint {
                        category: category.to_string(),
                        period_index: prediction.period_index,
                        period: period_at(origin, prediction.period_index),
                        predicted_value: prediction.value,
                        strategy: self.strategy.name(),
                    })
                    .collect(),
            ),
            Err(PipelineError::InsufficientData { available, .. }) => {
                debug!(category, observed = available, "insufficient history");
                ForecastOutcome::InsufficientHistory { observed: available }
            }
            Err(other) => return Err(other),
        };

        Ok(CategoryForecast {
            category: category.to_string(),
            outcome,
        })
    }

    /// Forecast every category of an aggregate, ordered by category name.
    #[instrument(skip_all, fields(strategy = self.strategy.name()))]
    pub fn forecast_all(&self, aggregate: &SalesAggregate) -> crate::Result<Vec<CategoryForecast>> {
        let histories: Vec<(String, Vec<TimeCategoryBucket>)> =
            aggregate.category_histories().into_iter().collect();

        let forecasts = histories
            .par_iter()
            .map(|(category, buckets)| self.forecast_category(category, buckets))
            .collect::<crate::Result<Vec<_>>>()?;

        let forecasted = forecasts
            .iter()
            .filter(|f| matches!(f.outcome, ForecastOutcome::Forecast(_)))
            .count();
        info!(
            categories = forecasts.len(),
            forecasted,
            skipped = forecasts.len() - forecasted,
            "forecasts computed"
        );
        Ok(forecasts)
    }
}

fn period_at(origin: Period, offset: i64) -> Period {
    let months = origin.year as i64 * 12 + (origin.month as i64 - 1) + offset;
    Period::new(months.div_euclid(12) as i32, (months.rem_euclid(12) + 1) as u32)
}
