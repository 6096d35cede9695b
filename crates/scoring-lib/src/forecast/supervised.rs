//! Supervised framing of a price column and walk-forward validation

use super::{ModelTrainer, Regressor};
use crate::error::{ScoringError, ScoringResult};

/// A window of past values and the value that followed it
#[derive(Debug, Clone, PartialEq)]
pub struct LaggedSample {
    pub features: Vec<f64>,
    pub label: f64,
}

/// Slide a window of `lag` values over the column
///
/// Row `t` uses values `t - lag .. t` as features and value `t` as label.
/// Positions without a complete window are dropped.
pub fn lag_windows(values: &[f64], lag: usize) -> Vec<LaggedSample> {
    if lag == 0 || values.len() <= lag {
        return Vec::new();
    }
    values
        .windows(lag + 1)
        .map(|w| LaggedSample {
            features: w[..lag].to_vec(),
            label: w[lag],
        })
        .collect()
}

/// Result of expanding-window validation over the newest samples
#[derive(Debug)]
pub struct WalkForward<M> {
    pub predictions: Vec<f64>,
    pub actuals: Vec<f64>,
    /// Mean absolute error of `predictions` against `actuals`
    pub mae: f64,
    /// Model fitted for the last test row
    pub model: M,
}

/// Validate over the last `n_test` samples without look-ahead
///
/// For each test row a fresh model is fitted on every sample strictly
/// before it; the row's true value joins the history afterwards.
pub fn walk_forward<T: ModelTrainer>(
    trainer: &T,
    samples: &[LaggedSample],
    n_test: usize,
) -> ScoringResult<WalkForward<T::Model>> {
    if n_test == 0 {
        return Err(ScoringError::ModelFitting("validation needs at least one row".into()));
    }
    if samples.len() <= n_test {
        return Err(ScoringError::ModelFitting(format!(
            "{} samples leave no training rows before {} validation rows",
            samples.len(),
            n_test
        )));
    }

    let split = samples.len() - n_test;
    let mut features: Vec<Vec<f64>> = samples[..split].iter().map(|s| s.features.clone()).collect();
    let mut labels: Vec<f64> = samples[..split].iter().map(|s| s.label).collect();

    let mut predictions = Vec::with_capacity(n_test);
    let mut actuals = Vec::with_capacity(n_test);
    let mut last_model = None;

    for sample in &samples[split..] {
        let model = trainer.fit(&features, &labels)?;
        predictions.push(model.predict(&sample.features)?);
        actuals.push(sample.label);

        features.push(sample.features.clone());
        labels.push(sample.label);
        last_model = Some(model);
    }

    let model = last_model
        .ok_or_else(|| ScoringError::ModelFitting("no model was fitted".into()))?;
    let mae = predictions
        .iter()
        .zip(&actuals)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / n_test as f64;

    Ok(WalkForward {
        predictions,
        actuals,
        mae,
        model,
    })
}
