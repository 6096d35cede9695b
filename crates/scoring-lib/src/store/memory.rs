//! In-memory market data and score storage

use super::ScoreFilter;
use crate::advisor::{AdvisorScore, AdvisoryData};
use crate::models::{CompositeScoreRecord, InstanceType, OperatingSystem, Partition, PricePoint, Region};
use crate::source::{async_trait, MarketDataSource, ScoreSink};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Market data held in memory
///
/// Partitions can be marked as failing, which makes every per-partition
/// fetch return an error.
#[derive(Debug, Default)]
pub struct MemoryMarketData {
    regions: Vec<Region>,
    operating_systems: Vec<OperatingSystem>,
    history: DashMap<Partition, Vec<PricePoint>>,
    on_demand: DashMap<Partition, HashMap<InstanceType, f64>>,
    advisory: AdvisoryData,
    failing: DashSet<Partition>,
    catalog_failure: bool,
}

impl MemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions<I, R>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Region>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operating_systems(mut self, systems: impl IntoIterator<Item = OperatingSystem>) -> Self {
        self.operating_systems = systems.into_iter().collect();
        self
    }

    pub fn with_advisory_data(mut self, advisory: AdvisoryData) -> Self {
        self.advisory = advisory;
        self
    }

    /// Make catalog and advisory fetches fail
    pub fn with_catalog_failure(mut self) -> Self {
        self.catalog_failure = true;
        self
    }

    pub fn add_price_history(&self, partition: &Partition, points: Vec<PricePoint>) {
        self.history
            .entry(partition.clone())
            .or_default()
            .extend(points);
    }

    pub fn set_on_demand_price(&self, partition: &Partition, instance_type: impl Into<InstanceType>, price: f64) {
        self.on_demand
            .entry(partition.clone())
            .or_default()
            .insert(instance_type.into(), price);
    }

    pub fn fail_partition(&self, partition: &Partition) {
        self.failing.insert(partition.clone());
    }

    pub fn restore_partition(&self, partition: &Partition) {
        self.failing.remove(partition);
    }

    fn check_partition(&self, partition: &Partition) -> Result<()> {
        if self.failing.contains(partition) {
            bail!("market data unavailable for {}", partition);
        }
        Ok(())
    }

    fn check_catalog(&self) -> Result<()> {
        if self.catalog_failure {
            bail!("reference catalog unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for MemoryMarketData {
    async fn list_regions(&self) -> Result<Vec<Region>> {
        self.check_catalog()?;
        Ok(self.regions.clone())
    }

    async fn list_operating_systems(&self) -> Result<Vec<OperatingSystem>> {
        self.check_catalog()?;
        Ok(self.operating_systems.clone())
    }

    async fn fetch_price_history(
        &self,
        partition: &Partition,
        lookback_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        self.check_partition(partition)?;
        let since = as_of - Duration::days(i64::from(lookback_days));
        Ok(self
            .history
            .get(partition)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp > since && p.timestamp <= as_of)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_on_demand_prices(&self, partition: &Partition) -> Result<HashMap<InstanceType, f64>> {
        self.check_partition(partition)?;
        Ok(self
            .on_demand
            .get(partition)
            .map(|prices| prices.clone())
            .unwrap_or_default())
    }

    async fn fetch_advisory_data(&self, _date: NaiveDate) -> Result<AdvisoryData> {
        self.check_catalog()?;
        Ok(self.advisory.clone())
    }
}

/// Score records held in memory, replaced whole per partition
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    partitions: DashMap<Partition, Vec<CompositeScoreRecord>>,
    advisor_scores: RwLock<Vec<AdvisorScore>>,
    rejecting: DashSet<Partition>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes for a partition fail
    pub fn reject_partition(&self, partition: &Partition) {
        self.rejecting.insert(partition.clone());
    }

    pub fn accept_partition(&self, partition: &Partition) {
        self.rejecting.remove(partition);
    }

    pub fn partition(&self, partition: &Partition) -> Option<Vec<CompositeScoreRecord>> {
        self.partitions.get(partition).map(|records| records.clone())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Matching records, best score first
    pub fn query(&self, filter: &ScoreFilter) -> Vec<CompositeScoreRecord> {
        let mut records: Vec<CompositeScoreRecord> = self
            .partitions
            .iter()
            .filter(|entry| {
                let partition = entry.key();
                filter.region.as_ref().map_or(true, |r| *r == partition.region)
                    && filter
                        .operating_system
                        .map_or(true, |os| os == partition.operating_system)
            })
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        records.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.region.cmp(&b.region))
                .then_with(|| a.operating_system.cmp(&b.operating_system))
                .then_with(|| a.instance_type.cmp(&b.instance_type))
                .then_with(|| a.availability_zone.cmp(&b.availability_zone))
        });
        records
    }

    pub async fn advisor_scores(&self) -> Vec<AdvisorScore> {
        self.advisor_scores.read().await.clone()
    }
}

#[async_trait]
impl ScoreSink for MemoryScoreStore {
    async fn replace_partition_scores(
        &self,
        partition: &Partition,
        records: Vec<CompositeScoreRecord>,
    ) -> Result<()> {
        if self.rejecting.contains(partition) {
            bail!("score store rejected write for {}", partition);
        }
        debug!(partition = %partition, records = records.len(), "Replacing partition scores");
        self.partitions.insert(partition.clone(), records);
        Ok(())
    }

    async fn replace_advisor_scores(&self, scores: Vec<AdvisorScore>) -> Result<()> {
        *self.advisor_scores.write().await = scores;
        Ok(())
    }
}
