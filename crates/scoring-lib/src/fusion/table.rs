//! Pure score table for one partition

use crate::advisor::AdvisoryData;
use crate::forecast::ForecastPoint;
use crate::models::{AvailabilityZone, ColumnStats, CompositeScoreRecord, InstanceType, Partition};
use crate::normalize::min_max;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Why an instance type produced no records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SkipReason {
    /// No usable on-demand baseline price
    MissingBaseline,
    /// No zone had both statistics and a forecast
    MissingForecast,
    /// No advisory entry for the instance type
    MissingAdvisory,
    /// Price history could not be turned into a series
    InvalidHistory,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingBaseline => "no on-demand baseline price",
            SkipReason::MissingForecast => "no zone with both statistics and forecast",
            SkipReason::MissingAdvisory => "no advisory entry",
            SkipReason::InvalidHistory => "unusable price history",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedInstance {
    pub instance_type: InstanceType,
    pub reason: SkipReason,
}

/// Per-partition inputs to the fusion
pub struct FusionInputs<'a> {
    pub partition: &'a Partition,
    pub statistics: &'a BTreeMap<InstanceType, BTreeMap<AvailabilityZone, ColumnStats>>,
    pub forecasts: &'a BTreeMap<InstanceType, ForecastPoint>,
    pub baselines: &'a HashMap<InstanceType, f64>,
    pub advisory: &'a AdvisoryData,
}

/// One surviving instance type before normalization
#[derive(Debug, Clone, PartialEq)]
struct FusionRow {
    instance_type: InstanceType,
    /// `exp(1 - r)`
    interruption: f64,
    savings: f64,
    /// Blended savings minus volatility, per observed zone
    zone_scores: BTreeMap<AvailabilityZone, f64>,
}

/// Normalized columns of one partition, rows in instance-type order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionTable {
    pub instance_types: Vec<InstanceType>,
    pub interruption: Vec<f64>,
    pub savings: Vec<f64>,
    /// Zero-filled where an instance type lacks the zone
    pub zones: BTreeMap<AvailabilityZone, Vec<f64>>,
    /// Cells that were actually observed
    pub observed: BTreeSet<(usize, AvailabilityZone)>,
}

#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    pub table: FusionTable,
    pub records: Vec<CompositeScoreRecord>,
    pub skipped: Vec<SkippedInstance>,
}

/// Zone score before normalization
///
/// Average of predicted and historical savings over the baseline, less the
/// rolling standard deviation.
pub fn zone_raw_score(baseline: f64, stats: ColumnStats, forecast: f64) -> f64 {
    let predicted_savings = 1.0 - forecast / baseline;
    let historical_savings = 1.0 - stats.mean / baseline;
    (predicted_savings + historical_savings) / 2.0 - stats.std_dev
}

/// Fuse statistics, forecasts, baselines and advisory data into records
pub fn fuse_partition(inputs: &FusionInputs<'_>) -> FusionOutcome {
    let mut rows = Vec::new();
    let mut skipped = Vec::new();

    for (instance_type, zone_stats) in inputs.statistics {
        match build_row(inputs, instance_type, zone_stats) {
            Ok(row) => rows.push(row),
            Err(reason) => skipped.push(SkippedInstance {
                instance_type: instance_type.clone(),
                reason,
            }),
        }
    }

    let table = normalize_rows(&rows);
    let records = score_records(inputs.partition, &table);

    FusionOutcome {
        table,
        records,
        skipped,
    }
}

fn build_row(
    inputs: &FusionInputs<'_>,
    instance_type: &InstanceType,
    zone_stats: &BTreeMap<AvailabilityZone, ColumnStats>,
) -> Result<FusionRow, SkipReason> {
    let baseline = inputs
        .baselines
        .get(instance_type)
        .copied()
        .filter(|b| b.is_finite() && *b > 0.0)
        .ok_or(SkipReason::MissingBaseline)?;
    let forecast = inputs
        .forecasts
        .get(instance_type)
        .ok_or(SkipReason::MissingForecast)?;

    let zone_scores: BTreeMap<AvailabilityZone, f64> = zone_stats
        .iter()
        .filter_map(|(az, stats)| {
            let predicted = forecast.price(az)?;
            let raw = zone_raw_score(baseline, *stats, predicted);
            raw.is_finite().then(|| (az.clone(), raw))
        })
        .collect();
    if zone_scores.is_empty() {
        return Err(SkipReason::MissingForecast);
    }

    let advisory = inputs
        .advisory
        .lookup_for(inputs.partition, instance_type)
        .ok_or(SkipReason::MissingAdvisory)?;

    Ok(FusionRow {
        instance_type: instance_type.clone(),
        interruption: (1.0 - f64::from(advisory.interruption_bucket)).exp(),
        savings: advisory.savings_percent,
        zone_scores,
    })
}

fn normalize_rows(rows: &[FusionRow]) -> FusionTable {
    let zones: BTreeSet<&AvailabilityZone> = rows.iter().flat_map(|r| r.zone_scores.keys()).collect();

    let interruption: Vec<f64> = rows.iter().map(|r| r.interruption).collect();
    let savings: Vec<f64> = rows.iter().map(|r| r.savings).collect();

    let mut observed = BTreeSet::new();
    let mut zone_columns = BTreeMap::new();
    for az in zones {
        let column: Vec<f64> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| match row.zone_scores.get(az) {
                Some(score) => {
                    observed.insert((i, az.clone()));
                    *score
                }
                None => 0.0,
            })
            .collect();
        zone_columns.insert(az.clone(), min_max(&column));
    }

    FusionTable {
        instance_types: rows.iter().map(|r| r.instance_type.clone()).collect(),
        interruption: min_max(&interruption),
        savings: min_max(&savings),
        zones: zone_columns,
        observed,
    }
}

fn score_records(partition: &Partition, table: &FusionTable) -> Vec<CompositeScoreRecord> {
    let cells: Vec<(usize, &AvailabilityZone)> = table.observed.iter().map(|(i, az)| (*i, az)).collect();
    let combined: Vec<f64> = cells
        .iter()
        .map(|(i, az)| table.interruption[*i] + table.zones[*az][*i])
        .collect();

    cells
        .iter()
        .zip(min_max(&combined))
        .map(|((i, az), value)| CompositeScoreRecord {
            region: partition.region.clone(),
            operating_system: partition.operating_system,
            instance_type: table.instance_types[*i].clone(),
            availability_zone: (*az).clone(),
            score: to_public_score(value),
        })
        .collect()
}

/// Scale a normalized value to an integer in [0, 100]
fn to_public_score(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u8
}
