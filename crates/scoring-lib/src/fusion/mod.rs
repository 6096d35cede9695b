//! Per-partition score fusion
//!
//! [`ScoreFusion`] runs one partition end to end: price history, rolling
//! statistics, forecasts, on-demand baselines and advisory entries are
//! combined into the partition's score table, which then replaces the
//! partition's previous records in the sink. Errors never leave the
//! partition: they are logged and reported as a failed outcome, and the
//! previous records stay in place.

mod table;

pub use table::{
    fuse_partition, zone_raw_score, FusionInputs, FusionOutcome, FusionTable, SkipReason,
    SkippedInstance,
};

use crate::advisor::AdvisoryData;
use crate::error::{ScoringError, ScoringResult};
use crate::forecast::PriceForecaster;
use crate::history::{HistoryConfig, PriceHistoryStatistics};
use crate::models::Partition;
use crate::observability::StructuredLogger;
use crate::source::{MarketDataSource, ScoreSink};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Successful partition run
#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub partition: Partition,
    pub records_written: usize,
    pub skipped: Vec<SkippedInstance>,
    /// Zone forecasts that fell back to the last observed price
    pub model_fallbacks: usize,
    pub elapsed: Duration,
}

/// Result of one partition run
#[derive(Debug, Clone, Serialize)]
pub enum PartitionOutcome {
    Scored(PartitionReport),
    Failed {
        partition: Partition,
        error: String,
        elapsed: Duration,
    },
}

impl PartitionOutcome {
    pub fn partition(&self) -> &Partition {
        match self {
            PartitionOutcome::Scored(report) => &report.partition,
            PartitionOutcome::Failed { partition, .. } => partition,
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, PartitionOutcome::Scored(_))
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PartitionOutcome::Scored(report) => report.elapsed,
            PartitionOutcome::Failed { elapsed, .. } => *elapsed,
        }
    }
}

/// Scores single partitions against shared collaborators
pub struct ScoreFusion {
    source: Arc<dyn MarketDataSource>,
    sink: Arc<dyn ScoreSink>,
    history: HistoryConfig,
    forecaster: Arc<PriceForecaster>,
    logger: StructuredLogger,
}

impl ScoreFusion {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn ScoreSink>,
        history: HistoryConfig,
        forecaster: Arc<PriceForecaster>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            sink,
            history,
            forecaster,
            logger,
        }
    }

    /// Score and persist one partition; never returns an error
    pub async fn run_partition(
        &self,
        partition: Partition,
        advisory: Arc<AdvisoryData>,
        as_of: DateTime<Utc>,
    ) -> PartitionOutcome {
        let started = Instant::now();
        match self.score_partition(&partition, advisory, as_of, started).await {
            Ok(report) => {
                self.logger.partition_scored(&report);
                PartitionOutcome::Scored(report)
            }
            Err(e) => {
                let e = ScoringError::Partition {
                    partition: partition.clone(),
                    source: e,
                };
                self.logger.partition_failed(&partition, &e.to_string());
                PartitionOutcome::Failed {
                    partition,
                    error: e.to_string(),
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    async fn score_partition(
        &self,
        partition: &Partition,
        advisory: Arc<AdvisoryData>,
        as_of: DateTime<Utc>,
        started: Instant,
    ) -> anyhow::Result<PartitionReport> {
        let points = self
            .source
            .fetch_price_history(partition, self.history.lookback_days, as_of)
            .await
            .context("fetching price history")?;
        if points.is_empty() {
            return Err(ScoringError::DataUnavailable(format!("no price history for {}", partition)).into());
        }
        debug!(partition = %partition, points = points.len(), "Fetched price history");

        let baselines = self
            .source
            .fetch_on_demand_prices(partition)
            .await
            .context("fetching on-demand prices")?;

        let statistics = PriceHistoryStatistics::new(self.history.period);
        let forecaster = self.forecaster.clone();
        let owned_partition = partition.clone();
        let (outcome, model_fallbacks) = tokio::task::spawn_blocking(move || {
            let summary = statistics.summarize(points, as_of);
            let forecasts = forecaster.forecast_all(&summary.series);
            let fallbacks = forecasts.values().map(|f| f.fallbacks()).sum::<usize>();
            let mut outcome = fuse_partition(&FusionInputs {
                partition: &owned_partition,
                statistics: &summary.statistics,
                forecasts: &forecasts,
                baselines: &baselines,
                advisory: &advisory,
            });
            outcome
                .skipped
                .extend(summary.skipped.into_iter().map(|(instance_type, _)| SkippedInstance {
                    instance_type,
                    reason: SkipReason::InvalidHistory,
                }));
            (outcome, fallbacks)
        })
        .await
        .context("scoring task panicked")?;

        for skipped in &outcome.skipped {
            self.logger.instance_skipped(partition, skipped);
        }

        let records_written = ensure_records(partition, &outcome)?;
        self.sink
            .replace_partition_scores(partition, outcome.records)
            .await
            .map_err(ScoringError::Sink)?;

        Ok(PartitionReport {
            partition: partition.clone(),
            records_written,
            skipped: outcome.skipped,
            model_fallbacks,
            elapsed: started.elapsed(),
        })
    }
}

/// Number of records to write; an empty table counts as missing data
fn ensure_records(partition: &Partition, outcome: &FusionOutcome) -> ScoringResult<usize> {
    if outcome.records.is_empty() {
        return Err(ScoringError::DataUnavailable(format!(
            "no instance type of {} could be scored ({} skipped)",
            partition,
            outcome.skipped.len()
        )));
    }
    Ok(outcome.records.len())
}
