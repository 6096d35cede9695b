//! Scoring run orchestration
//!
//! One run loads the region and operating system catalogs and the day's
//! advisory snapshot, publishes the advisory score index, then submits one
//! [`ScoreFusion`] unit per (region, operating system) partition to a
//! [`TaskPool`]. Partitions share nothing but read-only reference data and
//! the source and sink clients.

use crate::advisor::{AdvisorFilter, AdvisorPolicy, AdvisorScoreIndex, AdvisoryData};
use crate::error::{ScoringError, ScoringResult};
use crate::forecast::{ForecastConfig, PriceForecaster};
use crate::fusion::{PartitionOutcome, ScoreFusion};
use crate::health::{components, HealthRegistry};
use crate::history::HistoryConfig;
use crate::models::Partition;
use crate::observability::{ScoringMetrics, StructuredLogger};
use crate::pool::{Completion, CompletionCallback, TaskPool};
use crate::source::{MarketDataSource, ScoreSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Run-level behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wait for every partition, or detach once all are submitted
    pub wait: bool,
    /// Publish the advisory score index at the start of each run
    pub publish_advisor_scores: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wait: true,
            publish_advisor_scores: true,
        }
    }
}

/// Every library knob of a scoring run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub history: HistoryConfig,
    pub forecast: ForecastConfig,
    pub advisor: AdvisorPolicy,
    pub orchestrator: OrchestratorConfig,
}

/// Outcome of a run that waited for all partitions
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub as_of: DateTime<Utc>,
    pub outcomes: Vec<PartitionOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn scored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_scored()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.scored()
    }

    pub fn records_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                PartitionOutcome::Scored(report) => report.records_written,
                PartitionOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn model_fallbacks(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                PartitionOutcome::Scored(report) => report.model_fallbacks,
                PartitionOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn outcome(&self, partition: &Partition) -> Option<&PartitionOutcome> {
        self.outcomes.iter().find(|o| o.partition() == partition)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_scored())
    }
}

/// Reference data shared by every partition of one run
struct RunContext {
    partitions: Vec<Partition>,
    advisory: Arc<AdvisoryData>,
}

/// Drives scoring runs over the full partition catalog
pub struct ScoringOrchestrator {
    source: Arc<dyn MarketDataSource>,
    sink: Arc<dyn ScoreSink>,
    config: ScoringConfig,
    fusion: Arc<ScoreFusion>,
    runtime: Handle,
    metrics: ScoringMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl ScoringOrchestrator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn ScoreSink>,
        config: ScoringConfig,
        runtime: Handle,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> ScoringResult<Self> {
        config.advisor.validate()?;
        let forecaster = Arc::new(PriceForecaster::new(config.forecast.clone()));
        let fusion = Arc::new(ScoreFusion::new(
            source.clone(),
            sink.clone(),
            config.history.clone(),
            forecaster,
            logger.clone(),
        ));

        Ok(Self {
            source,
            sink,
            config,
            fusion,
            runtime,
            metrics: ScoringMetrics::new(),
            logger,
            health,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every partition as of now and wait for all of them
    pub async fn run(&self) -> ScoringResult<RunSummary> {
        self.run_at(Utc::now()).await
    }

    /// Score every partition as of `as_of` and wait for all of them
    ///
    /// Fails only when the reference data cannot be loaded; individual
    /// partition failures are reported in the summary.
    pub async fn run_at(&self, as_of: DateTime<Utc>) -> ScoringResult<RunSummary> {
        let started = Instant::now();
        let context = self.prepare(as_of).await?;

        let mut pool = TaskPool::new(self.runtime.clone());
        self.submit_all(&mut pool, &context, as_of);

        let mut outcomes = Vec::with_capacity(context.partitions.len());
        for (handle, result) in pool.join_all().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let Some(partition) = context.partitions.get(handle.id()).cloned() else {
                        warn!(task = handle.id(), error = %e, "Unit finished without a known partition");
                        continue;
                    };
                    self.logger.partition_failed(&partition, &e.to_string());
                    self.metrics.record_failed(Duration::ZERO);
                    outcomes.push(PartitionOutcome::Failed {
                        partition,
                        error: e.to_string(),
                        elapsed: Duration::ZERO,
                    });
                }
            }
        }

        let summary = RunSummary {
            as_of,
            outcomes,
            elapsed: started.elapsed(),
        };
        self.finish(&summary).await;
        Ok(summary)
    }

    /// Submit every partition as of `as_of` without waiting
    ///
    /// Returns the number of submitted partitions. Results are only visible
    /// through the sink, metrics and logs.
    pub async fn launch_at(&self, as_of: DateTime<Utc>) -> ScoringResult<usize> {
        let context = self.prepare(as_of).await?;
        let mut pool = TaskPool::new(self.runtime.clone());
        self.submit_all(&mut pool, &context, as_of);
        Ok(pool.detach())
    }

    async fn prepare(&self, as_of: DateTime<Utc>) -> ScoringResult<RunContext> {
        self.metrics.inc_runs();

        let context = match self.load_reference_data(as_of).await {
            Ok(context) => context,
            Err(e) => {
                self.health
                    .set_unhealthy(components::SOURCE, format!("{:#}", e))
                    .await;
                return Err(ScoringError::Source(e));
            }
        };
        self.health.set_healthy(components::SOURCE).await;
        self.health.set_ready(true).await;
        self.logger.run_started(context.partitions.len(), as_of);

        if self.config.orchestrator.publish_advisor_scores {
            self.publish_advisor_scores(&context.advisory).await?;
        }
        Ok(context)
    }

    async fn load_reference_data(&self, as_of: DateTime<Utc>) -> anyhow::Result<RunContext> {
        let mut regions = self.source.list_regions().await?;
        regions.sort();
        regions.dedup();
        let mut systems = self.source.list_operating_systems().await?;
        systems.sort();
        systems.dedup();
        let advisory = self.source.fetch_advisory_data(as_of.date_naive()).await?;

        let partitions = systems
            .iter()
            .flat_map(|os| regions.iter().map(move |region| Partition::new(region.clone(), *os)))
            .collect();

        Ok(RunContext {
            partitions,
            advisory: Arc::new(advisory),
        })
    }

    async fn publish_advisor_scores(&self, advisory: &AdvisoryData) -> ScoringResult<()> {
        let index = AdvisorScoreIndex::build(advisory, &self.config.advisor)?;
        self.logger.advisor_index_built(index.model(), index.len());
        self.metrics.set_advisor_scores(index.len());

        if let Err(e) = self
            .sink
            .replace_advisor_scores(index.fetch_scores(&AdvisorFilter::all()))
            .await
        {
            warn!(error = %e, "Failed to publish advisory scores");
            self.health
                .set_degraded(components::SINK, format!("advisory scores not published: {:#}", e))
                .await;
        }
        Ok(())
    }

    fn submit_all(&self, pool: &mut TaskPool<PartitionOutcome>, context: &RunContext, as_of: DateTime<Utc>) {
        let callback = self.completion_callback();
        for partition in &context.partitions {
            let fusion = self.fusion.clone();
            let advisory = context.advisory.clone();
            let partition = partition.clone();
            let handle = pool.submit_with_callback(
                async move { Ok(fusion.run_partition(partition, advisory, as_of).await) },
                callback.clone(),
            );
            debug!(task = handle.id(), "Submitted partition");
        }
    }

    fn completion_callback(&self) -> CompletionCallback<PartitionOutcome> {
        let metrics = self.metrics.clone();
        Arc::new(move |completion: Completion<'_, PartitionOutcome>| {
            match completion {
                Completion::Finished(PartitionOutcome::Scored(report)) => metrics.record_scored(report),
                Completion::Finished(PartitionOutcome::Failed { elapsed, .. }) => {
                    metrics.record_failed(*elapsed)
                }
                Completion::Failed(_) | Completion::Bare => {}
            }
            Ok(())
        })
    }

    async fn finish(&self, summary: &RunSummary) {
        let failed = summary.failed();
        if failed == 0 {
            self.health.set_healthy(components::ORCHESTRATOR).await;
        } else {
            self.health
                .set_degraded(
                    components::ORCHESTRATOR,
                    format!("{} of {} partitions failed", failed, summary.outcomes.len()),
                )
                .await;
        }

        let fallbacks = summary.model_fallbacks();
        if fallbacks == 0 {
            self.health.set_healthy(components::FORECASTER).await;
        } else {
            self.health
                .set_degraded(
                    components::FORECASTER,
                    format!("{} zone forecasts fell back to the last price", fallbacks),
                )
                .await;
        }

        self.metrics.set_last_run(Utc::now());
        self.logger
            .run_completed(summary.scored(), failed, summary.records_written(), summary.elapsed);
    }
}
