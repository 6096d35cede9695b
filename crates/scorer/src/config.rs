//! Scorer configuration

use anyhow::{Context, Result};
use scoring_lib::{AdvisorPolicy, ForecastConfig, HistoryConfig, OrchestratorConfig, ScoringConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "SCORER_CONFIG";

const ENV_PREFIX: &str = "SCORER";

/// Scorer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    /// Directory holding catalogs, price history and advisory snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory receiving score files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between scoring runs; 0 runs once and exits
    #[serde(default = "default_run_interval")]
    pub run_interval_secs: u64,

    /// Runtime worker threads executing partitions
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub advisor: AdvisorPolicy,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("scores")
}

fn default_api_port() -> u16 {
    8080
}

fn default_run_interval() -> u64 {
    3600
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ScorerConfig {
    /// Load from the file named by `SCORER_CONFIG`, if any, overridden by
    /// `SCORER_*` environment variables (nested keys use `__`)
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref(), None)
    }

    /// Load with an explicit file and, when given, an explicit environment
    pub fn load_from(path: Option<&str>, environment: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(environment),
            )
            .build()
            .context("Failed to read scorer configuration")?;

        config
            .try_deserialize()
            .context("Invalid scorer configuration")
    }

    /// Library settings for the orchestrator
    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            history: self.history.clone(),
            forecast: self.forecast.clone(),
            advisor: self.advisor.clone(),
            orchestrator: self.orchestrator.clone(),
        }
    }

    pub fn runs_once(&self) -> bool {
        self.run_interval_secs == 0
    }
}
