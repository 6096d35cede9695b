//! Collaborator seams for market data and score persistence
//!
//! The scoring core reads reference catalogs, price history, on-demand
//! prices and advisory snapshots through [`MarketDataSource`] and writes
//! finished partitions through [`ScoreSink`]. Implementations must tolerate
//! concurrent use from many partitions at once.

use crate::advisor::{AdvisorScore, AdvisoryData};
use crate::models::{CompositeScoreRecord, InstanceType, OperatingSystem, Partition, PricePoint, Region};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Read-only market data
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Region catalog
    async fn list_regions(&self) -> Result<Vec<Region>>;

    /// Operating system catalog
    async fn list_operating_systems(&self) -> Result<Vec<OperatingSystem>>;

    /// Spot price points of one partition observed within `lookback_days`
    /// before `as_of`
    async fn fetch_price_history(
        &self,
        partition: &Partition,
        lookback_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>>;

    /// On-demand baseline price per instance type of one partition
    async fn fetch_on_demand_prices(&self, partition: &Partition) -> Result<HashMap<InstanceType, f64>>;

    /// Advisory snapshot for a date
    async fn fetch_advisory_data(&self, date: NaiveDate) -> Result<AdvisoryData>;
}

/// Write-only score persistence
#[async_trait]
pub trait ScoreSink: Send + Sync {
    /// Replace every record of the partition with `records`
    ///
    /// Readers must never observe a mix of old and new records for one
    /// partition.
    async fn replace_partition_scores(
        &self,
        partition: &Partition,
        records: Vec<CompositeScoreRecord>,
    ) -> Result<()>;

    /// Replace the published advisory scores
    async fn replace_advisor_scores(&self, scores: Vec<AdvisorScore>) -> Result<()>;
}
