//! Spot Scorer - spot capacity desirability scoring service
//!
//! Scores every (region, operating system) partition found in the data
//! directory, writes the score files, and repeats on an interval while
//! serving health and metrics.

use anyhow::{Context, Result};
use chrono::Utc;
use scoring_lib::{
    health::HealthRegistry,
    observability::{ScoringMetrics, StructuredLogger},
    FileMarketData, FileScoreSink, ScoringOrchestrator,
};
use spot_scorer::{api, config::ScorerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_NAME: &str = "spot-scorer";
const SCORER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ScorerConfig::load()?;
    info!(
        version = SCORER_VERSION,
        data_dir = ?config.data_dir,
        output_dir = ?config.output_dir,
        worker_threads = config.worker_threads,
        "Starting spot-scorer"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: ScorerConfig) -> Result<()> {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ScoringMetrics::new();
    let logger = StructuredLogger::new(SERVICE_NAME);

    let orchestrator = ScoringOrchestrator::new(
        Arc::new(FileMarketData::new(&config.data_dir)),
        Arc::new(FileScoreSink::new(&config.output_dir)),
        config.scoring(),
        tokio::runtime::Handle::current(),
        health_registry.clone(),
        logger,
    )?;

    if config.runs_once() {
        return execute(&orchestrator).await;
    }

    let app_state = Arc::new(api::ScorerState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let mut ticker = tokio::time::interval(Duration::from_secs(config.run_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = execute(&orchestrator).await {
                    let message = format!("{:#}", e);
                    error!(error = %message, "Scoring run failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    api_handle.abort();
    Ok(())
}

/// One scoring pass in the configured mode
async fn execute(orchestrator: &ScoringOrchestrator) -> Result<()> {
    let as_of = Utc::now();
    if orchestrator.config().orchestrator.wait {
        let summary = orchestrator.run_at(as_of).await?;
        info!(
            scored = summary.scored(),
            failed = summary.failed(),
            records = summary.records_written(),
            "Scoring pass finished"
        );
    } else {
        let submitted = orchestrator.launch_at(as_of).await?;
        info!(submitted, "Scoring pass launched");
    }
    Ok(())
}
