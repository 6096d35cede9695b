//! Rolling price statistics over raw spot price history
//!
//! Turns one partition's raw, possibly duplicated price stream into one
//! daily [`InstanceSeries`] per instance type and summarizes the newest
//! rows of each availability-zone column.

mod series;

pub use series::InstanceSeries;
pub(crate) use series::sample_variance;

use crate::models::{AvailabilityZone, ColumnStats, InstanceType, PricePoint, StatisticsPeriod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Default look-back used when fetching history for scoring
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Configuration for history retrieval and statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Days of raw history requested from the source
    pub lookback_days: u32,
    /// Window for the rolling statistics
    pub period: StatisticsPeriod,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            period: StatisticsPeriod::Month,
        }
    }
}

/// Statistics and retained series for one partition
#[derive(Debug, Clone, Default)]
pub struct HistorySummary {
    pub statistics: BTreeMap<InstanceType, BTreeMap<AvailabilityZone, ColumnStats>>,
    pub series: BTreeMap<InstanceType, InstanceSeries>,
    /// Instance types dropped because their series could not be built
    pub skipped: Vec<(InstanceType, String)>,
}

/// Computes per-instance rolling statistics from raw price points
#[derive(Debug, Clone)]
pub struct PriceHistoryStatistics {
    period: StatisticsPeriod,
}

impl PriceHistoryStatistics {
    pub fn new(period: StatisticsPeriod) -> Self {
        Self { period }
    }

    pub fn period(&self) -> StatisticsPeriod {
        self.period
    }

    /// Summarize one partition's price stream as of `as_of`
    pub fn summarize(&self, points: Vec<PricePoint>, as_of: DateTime<Utc>) -> HistorySummary {
        let mut summary = HistorySummary::default();

        for (instance_type, group) in group_by_instance(prepare_points(points)) {
            match InstanceSeries::from_points(&instance_type, &group, as_of) {
                Ok(series) => {
                    let stats = series.tail_stats(self.period.rows());
                    debug!(
                        instance_type = %instance_type,
                        rows = series.len(),
                        zones = stats.len(),
                        "Summarized price series"
                    );
                    summary.statistics.insert(instance_type.clone(), stats);
                    summary.series.insert(instance_type, series);
                }
                Err(e) => {
                    warn!(instance_type = %instance_type, error = %e, "Dropping instance type from statistics");
                    summary.skipped.push((instance_type, e.to_string()));
                }
            }
        }

        summary
    }
}

impl Default for PriceHistoryStatistics {
    fn default() -> Self {
        Self::new(StatisticsPeriod::Month)
    }
}

/// Sort by (instance type, zone, timestamp) and drop exact duplicate rows
///
/// The sort is stable, so among conflicting rows for one timestamp the
/// stream order is preserved.
pub fn prepare_points(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.sort_by(|a, b| {
        (&a.instance_type, &a.availability_zone, a.timestamp).cmp(&(
            &b.instance_type,
            &b.availability_zone,
            b.timestamp,
        ))
    });

    let mut seen = HashSet::new();
    points.retain(|p| {
        seen.insert((
            p.instance_type.clone(),
            p.availability_zone.clone(),
            p.timestamp,
            p.price.to_bits(),
        ))
    });
    points
}

fn group_by_instance(points: Vec<PricePoint>) -> BTreeMap<InstanceType, Vec<PricePoint>> {
    let mut groups: BTreeMap<InstanceType, Vec<PricePoint>> = BTreeMap::new();
    for point in points {
        groups.entry(point.instance_type.clone()).or_default().push(point);
    }
    groups
}
