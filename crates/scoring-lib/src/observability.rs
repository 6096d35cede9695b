//! Observability for scoring runs
//!
//! Provides:
//! - Prometheus metrics (runs, partition outcomes, records, latency)
//! - Structured lifecycle events through tracing

use crate::advisor::AdvisorModel;
use crate::fusion::{PartitionReport, SkippedInstance};
use crate::models::Partition;
use chrono::{DateTime, Utc};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for partition latency (in seconds)
const PARTITION_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<ScoringMetricsInner> = OnceLock::new();

struct ScoringMetricsInner {
    runs_total: IntCounter,
    partitions_scored: IntCounter,
    partitions_failed: IntCounter,
    records_written: IntCounter,
    instances_skipped: IntCounter,
    model_fallbacks: IntCounter,
    partition_latency_seconds: Histogram,
    last_run_timestamp: IntGauge,
    advisor_scores: IntGauge,
}

impl ScoringMetricsInner {
    fn new() -> Self {
        Self {
            runs_total: register_int_counter!(
                "spot_scorer_runs_total",
                "Scoring runs started"
            )
            .expect("Failed to register runs_total"),

            partitions_scored: register_int_counter!(
                "spot_scorer_partitions_scored_total",
                "Partitions scored and persisted"
            )
            .expect("Failed to register partitions_scored"),

            partitions_failed: register_int_counter!(
                "spot_scorer_partitions_failed_total",
                "Partitions abandoned with their previous scores kept"
            )
            .expect("Failed to register partitions_failed"),

            records_written: register_int_counter!(
                "spot_scorer_records_written_total",
                "Score records handed to the sink"
            )
            .expect("Failed to register records_written"),

            instances_skipped: register_int_counter!(
                "spot_scorer_instances_skipped_total",
                "Instance types dropped for missing data"
            )
            .expect("Failed to register instances_skipped"),

            model_fallbacks: register_int_counter!(
                "spot_scorer_model_fallbacks_total",
                "Zone forecasts that fell back to the last observed price"
            )
            .expect("Failed to register model_fallbacks"),

            partition_latency_seconds: register_histogram!(
                "spot_scorer_partition_latency_seconds",
                "Wall time of one partition run",
                PARTITION_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register partition_latency_seconds"),

            last_run_timestamp: register_int_gauge!(
                "spot_scorer_last_run_timestamp_seconds",
                "Completion time of the latest scoring run"
            )
            .expect("Failed to register last_run_timestamp"),

            advisor_scores: register_int_gauge!(
                "spot_scorer_advisor_scores",
                "Entries in the latest advisory score index"
            )
            .expect("Failed to register advisor_scores"),
        }
    }
}

/// Handle to the process-wide scoring metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScoringMetrics {
    _private: (),
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScoringMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScoringMetricsInner {
        GLOBAL_METRICS.get_or_init(ScoringMetricsInner::new)
    }

    pub fn inc_runs(&self) {
        self.inner().runs_total.inc();
    }

    /// Record a persisted partition
    pub fn record_scored(&self, report: &PartitionReport) {
        let inner = self.inner();
        inner.partitions_scored.inc();
        inner.records_written.inc_by(report.records_written as u64);
        inner.instances_skipped.inc_by(report.skipped.len() as u64);
        inner.model_fallbacks.inc_by(report.model_fallbacks as u64);
        inner.partition_latency_seconds.observe(report.elapsed.as_secs_f64());
    }

    pub fn record_failed(&self, elapsed: Duration) {
        let inner = self.inner();
        inner.partitions_failed.inc();
        inner.partition_latency_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn set_last_run(&self, at: DateTime<Utc>) {
        self.inner().last_run_timestamp.set(at.timestamp());
    }

    pub fn set_advisor_scores(&self, count: usize) {
        self.inner().advisor_scores.set(count as i64);
    }

    pub fn partitions_scored(&self) -> u64 {
        self.inner().partitions_scored.get()
    }

    pub fn partitions_failed(&self) -> u64 {
        self.inner().partitions_failed.get()
    }
}

/// Structured logger for scoring lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn run_started(&self, partitions: usize, as_of: DateTime<Utc>) {
        info!(
            event = "scoring_run_started",
            service = %self.service,
            partitions = partitions,
            as_of = %as_of.to_rfc3339(),
            "Scoring run started"
        );
    }

    pub fn partition_scored(&self, report: &PartitionReport) {
        info!(
            event = "partition_scored",
            service = %self.service,
            region = %report.partition.region,
            operating_system = report.partition.operating_system.short_code(),
            records = report.records_written,
            skipped = report.skipped.len(),
            model_fallbacks = report.model_fallbacks,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Partition scored"
        );
    }

    pub fn partition_failed(&self, partition: &Partition, error: &str) {
        error!(
            event = "partition_failed",
            service = %self.service,
            region = %partition.region,
            operating_system = partition.operating_system.short_code(),
            error = %error,
            "Partition failed, previous scores kept"
        );
    }

    pub fn instance_skipped(&self, partition: &Partition, skipped: &SkippedInstance) {
        warn!(
            event = "instance_skipped",
            service = %self.service,
            region = %partition.region,
            operating_system = partition.operating_system.short_code(),
            instance_type = %skipped.instance_type,
            reason = %skipped.reason,
            "Instance type dropped from partition"
        );
    }

    pub fn run_completed(&self, scored: usize, failed: usize, records: usize, elapsed: Duration) {
        if failed == 0 {
            info!(
                event = "scoring_run_completed",
                service = %self.service,
                scored = scored,
                failed = failed,
                records = records,
                elapsed_ms = elapsed.as_millis() as u64,
                "Scoring run completed"
            );
        } else {
            warn!(
                event = "scoring_run_completed",
                service = %self.service,
                scored = scored,
                failed = failed,
                records = records,
                elapsed_ms = elapsed.as_millis() as u64,
                "Scoring run completed with failed partitions"
            );
        }
    }

    pub fn advisor_index_built(&self, model: AdvisorModel, entries: usize) {
        info!(
            event = "advisor_index_built",
            service = %self.service,
            model = ?model,
            entries = entries,
            "Advisory score index built"
        );
    }
}
