//! One-step-ahead price forecasting
//!
//! Each availability-zone column of an [`InstanceSeries`] gets one predicted
//! next price. Near-constant columns repeat their last value; the rest are
//! framed as lagged samples, validated walk-forward and predicted with the
//! last validated model. Any fitting error falls back to the last value.

mod forest;
mod supervised;

pub use forest::{RandomForest, RandomForestTrainer};
pub use supervised::{lag_windows, walk_forward, LaggedSample, WalkForward};

use crate::error::{ScoringError, ScoringResult};
use crate::history::{sample_variance, InstanceSeries};
use crate::models::{AvailabilityZone, InstanceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A fitted model producing one value per feature row
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> ScoringResult<f64>;
}

/// Fits a fresh [`Regressor`] from feature rows and labels
pub trait ModelTrainer: Send + Sync {
    type Model: Regressor;

    fn fit(&self, features: &[Vec<f64>], labels: &[f64]) -> ScoringResult<Self::Model>;
}

/// Forecasting knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Number of past values used as features
    pub lag_window: usize,
    /// Samples held out for walk-forward validation
    pub validation_rows: usize,
    pub trees: usize,
    /// Columns with variance at or below this repeat their last value
    pub variance_threshold: f64,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lag_window: 6,
            validation_rows: 12,
            trees: 50,
            variance_threshold: 0.001,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// How a zone forecast was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastMethod {
    /// Low-variance column, last value repeated
    LastValue,
    /// Walk-forward validated model
    Model,
    /// Model fitting failed, last value used instead
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneForecast {
    pub price: f64,
    pub method: ForecastMethod,
    /// Validation mean absolute error when a model was used
    pub validation_mae: Option<f64>,
}

/// Predicted next price per availability zone for one instance type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub instance_type: InstanceType,
    pub zones: BTreeMap<AvailabilityZone, ZoneForecast>,
}

impl ForecastPoint {
    pub fn price(&self, az: &AvailabilityZone) -> Option<f64> {
        self.zones.get(az).map(|z| z.price)
    }

    /// Zones whose model failed and fell back to the last value
    pub fn fallbacks(&self) -> usize {
        self.zones
            .values()
            .filter(|z| z.method == ForecastMethod::Fallback)
            .count()
    }
}

/// Per-column forecaster over retained price series
pub struct PriceForecaster<T: ModelTrainer = RandomForestTrainer> {
    config: ForecastConfig,
    trainer: T,
}

impl PriceForecaster<RandomForestTrainer> {
    /// Forecaster backed by a seeded random forest
    pub fn new(config: ForecastConfig) -> Self {
        let trainer = RandomForestTrainer::new(config.trees, config.min_samples_leaf, config.seed);
        Self { config, trainer }
    }
}

impl<T: ModelTrainer> PriceForecaster<T> {
    pub fn with_trainer(config: ForecastConfig, trainer: T) -> Self {
        Self { config, trainer }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast the next value of a single column
    pub fn forecast_column(&self, values: &[f64]) -> ScoringResult<ZoneForecast> {
        let last = *values
            .last()
            .ok_or_else(|| ScoringError::DataUnavailable("empty price column".into()))?;

        if sample_variance(values) <= self.config.variance_threshold {
            return Ok(ZoneForecast {
                price: last,
                method: ForecastMethod::LastValue,
                validation_mae: None,
            });
        }

        match self.model_forecast(values) {
            Ok((price, mae)) => Ok(ZoneForecast {
                price,
                method: ForecastMethod::Model,
                validation_mae: Some(mae),
            }),
            Err(e) => {
                warn!(error = %e, fallback = last, "Forecast model failed, using last observed price");
                Ok(ZoneForecast {
                    price: last,
                    method: ForecastMethod::Fallback,
                    validation_mae: None,
                })
            }
        }
    }

    fn model_forecast(&self, values: &[f64]) -> ScoringResult<(f64, f64)> {
        let lag = self.config.lag_window;
        let samples = lag_windows(values, lag);
        let validated = walk_forward(&self.trainer, &samples, self.config.validation_rows)?;

        let recent = &values[values.len() - lag..];
        let price = validated.model.predict(recent)?;
        if !price.is_finite() {
            return Err(ScoringError::ModelFitting(format!("non-finite forecast {}", price)));
        }
        Ok((price, validated.mae))
    }

    /// Forecast every zone column of one series
    pub fn forecast_series(&self, series: &InstanceSeries) -> ForecastPoint {
        let mut zones = BTreeMap::new();
        for (az, column) in series.columns() {
            match self.forecast_column(column) {
                Ok(forecast) => {
                    debug!(
                        instance_type = %series.instance_type(),
                        availability_zone = %az,
                        price = forecast.price,
                        method = ?forecast.method,
                        "Forecast zone price"
                    );
                    zones.insert(az.clone(), forecast);
                }
                Err(e) => {
                    warn!(
                        instance_type = %series.instance_type(),
                        availability_zone = %az,
                        error = %e,
                        "No forecast for zone"
                    );
                }
            }
        }
        ForecastPoint {
            instance_type: series.instance_type().clone(),
            zones,
        }
    }

    pub fn forecast_all(
        &self,
        series: &BTreeMap<InstanceType, InstanceSeries>,
    ) -> BTreeMap<InstanceType, ForecastPoint> {
        series
            .iter()
            .map(|(instance_type, s)| (instance_type.clone(), self.forecast_series(s)))
            .collect()
    }
}

impl Default for PriceForecaster<RandomForestTrainer> {
    fn default() -> Self {
        Self::new(ForecastConfig::default())
    }
}
