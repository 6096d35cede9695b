//! Scoring error types.

use crate::models::Partition;
use thiserror::Error;

/// Errors that can occur while computing spot market scores.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("model fitting failed: {0}")]
    ModelFitting(String),

    #[error("invalid price series: {0}")]
    InvalidSeries(String),

    #[error("invalid advisor policy: {0}")]
    InvalidPolicy(String),

    #[error("partition {partition} failed: {source:#}")]
    Partition {
        partition: Partition,
        #[source]
        source: anyhow::Error,
    },

    #[error("pool task {index} failed: {message}")]
    PoolTask { index: usize, message: String },

    #[error("source error: {0}")]
    Source(#[source] anyhow::Error),

    #[error("sink error: {0}")]
    Sink(#[source] anyhow::Error),
}

pub type ScoringResult<T> = Result<T, ScoringError>;
