//! Spot capacity desirability scoring
//!
//! This crate provides the core functionality for:
//! - Rolling price statistics over spot price history
//! - Per-zone price forecasting with walk-forward validation
//! - Interruption/savings advisory scoring
//! - Per-partition score fusion and concurrent orchestration
//! - Reference market data sources and score sinks
//! - Health checks and observability

pub mod advisor;
pub mod error;
pub mod forecast;
pub mod fusion;
pub mod health;
pub mod history;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod orchestrator;
pub mod pool;
pub mod source;
pub mod store;

pub use advisor::{AdvisorFilter, AdvisorModel, AdvisorPolicy, AdvisorScore, AdvisorScoreIndex, AdvisoryData};
pub use error::{ScoringError, ScoringResult};
pub use forecast::{ForecastConfig, PriceForecaster};
pub use fusion::{PartitionOutcome, PartitionReport, ScoreFusion};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{HistoryConfig, PriceHistoryStatistics};
pub use models::*;
pub use observability::{ScoringMetrics, StructuredLogger};
pub use orchestrator::{OrchestratorConfig, RunSummary, ScoringConfig, ScoringOrchestrator};
pub use pool::TaskPool;
pub use source::{MarketDataSource, ScoreSink};
pub use store::{FileMarketData, FileScoreSink, MemoryMarketData, MemoryScoreStore, ScoreFilter};
