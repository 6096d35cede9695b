//! Per-instance price table resampled to daily rows

use crate::error::{ScoringError, ScoringResult};
use crate::models::{AvailabilityZone, ColumnStats, InstanceType, PricePoint};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;

/// One instance type's prices: one column per availability zone, one row
/// per day
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSeries {
    instance_type: InstanceType,
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<AvailabilityZone, Vec<f64>>,
}

impl InstanceSeries {
    /// Build a daily series directly from aligned columns
    pub fn from_columns(
        instance_type: impl Into<InstanceType>,
        timestamps: Vec<DateTime<Utc>>,
        columns: BTreeMap<AvailabilityZone, Vec<f64>>,
    ) -> ScoringResult<Self> {
        let instance_type = instance_type.into();
        if let Some((az, column)) = columns.iter().find(|(_, c)| c.len() != timestamps.len()) {
            return Err(ScoringError::InvalidSeries(format!(
                "{} column {} has {} rows, expected {}",
                instance_type,
                az,
                column.len(),
                timestamps.len()
            )));
        }
        Ok(Self {
            instance_type,
            timestamps,
            columns,
        })
    }

    /// Pivot, gap-fill and daily-resample the points of one instance type
    ///
    /// `points` must all belong to `instance_type` and be sorted by
    /// (availability zone, timestamp). A row anchored at `as_of` repeats the
    /// newest known value of every column when `as_of` is later than the
    /// newest observation.
    pub fn from_points(
        instance_type: &InstanceType,
        points: &[PricePoint],
        as_of: DateTime<Utc>,
    ) -> ScoringResult<Self> {
        if points.is_empty() {
            return Err(ScoringError::InvalidSeries(format!(
                "{} has no price points",
                instance_type
            )));
        }
        if let Some(bad) = points.iter().find(|p| !p.price.is_finite() || p.price < 0.0) {
            return Err(ScoringError::InvalidSeries(format!(
                "{} in {} has invalid price {} at {}",
                instance_type, bad.availability_zone, bad.price, bad.timestamp
            )));
        }

        // Pivot: union of timestamps as the row index
        let mut index: Vec<DateTime<Utc>> = points.iter().map(|p| p.timestamp).collect();
        index.sort();
        index.dedup();

        let mut raw: BTreeMap<AvailabilityZone, Vec<Option<f64>>> = BTreeMap::new();
        for point in points {
            let row = index
                .binary_search(&point.timestamp)
                .map_err(|_| ScoringError::InvalidSeries("timestamp missing from index".into()))?;
            let column = raw
                .entry(point.availability_zone.clone())
                .or_insert_with(|| vec![None; index.len()]);
            // Conflicting prices for one timestamp: the later point wins
            column[row] = Some(point.price);
        }

        // Anchor the series at the evaluation time
        if index.last().is_some_and(|last| as_of > *last) {
            index.push(as_of);
            for column in raw.values_mut() {
                column.push(None);
            }
        }

        for column in raw.values_mut() {
            forward_fill(column);
            back_fill(column);
        }

        let labels = daily_labels(index[0], index[index.len() - 1])?;
        let mut columns = BTreeMap::new();
        for (az, column) in raw {
            let newest = column.iter().rev().find_map(|v| *v);
            let mut resampled: Vec<Option<f64>> = labels
                .iter()
                .map(|label| value_as_of(&index, &column, *label))
                .collect();
            back_fill(&mut resampled);

            let values = resampled
                .into_iter()
                .map(|v| v.or(newest))
                .collect::<Option<Vec<f64>>>()
                .ok_or_else(|| {
                    ScoringError::InvalidSeries(format!("{} column {} is empty", instance_type, az))
                })?;
            columns.insert(az, values);
        }

        Ok(Self {
            instance_type: instance_type.clone(),
            timestamps: labels,
            columns,
        })
    }

    pub fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn zones(&self) -> impl Iterator<Item = &AvailabilityZone> {
        self.columns.keys()
    }

    pub fn column(&self, az: &AvailabilityZone) -> Option<&[f64]> {
        self.columns.get(az).map(|c| c.as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&AvailabilityZone, &[f64])> {
        self.columns.iter().map(|(az, c)| (az, c.as_slice()))
    }

    /// Mean and standard deviation over the newest `rows` rows per column
    ///
    /// Uses the whole history when fewer rows exist.
    pub fn tail_stats(&self, rows: usize) -> BTreeMap<AvailabilityZone, ColumnStats> {
        let take = rows.min(self.len());
        self.columns
            .iter()
            .map(|(az, column)| {
                let window = &column[column.len() - take..];
                (
                    az.clone(),
                    ColumnStats {
                        mean: mean(window),
                        std_dev: sample_variance(window).sqrt(),
                    },
                )
            })
            .collect()
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1); zero for fewer than two values
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

fn forward_fill(column: &mut [Option<f64>]) {
    let mut last = None;
    for cell in column.iter_mut() {
        match cell {
            Some(v) => last = Some(*v),
            None => *cell = last,
        }
    }
}

fn back_fill(column: &mut [Option<f64>]) {
    let mut next = None;
    for cell in column.iter_mut().rev() {
        match cell {
            Some(v) => next = Some(*v),
            None => *cell = next,
        }
    }
}

/// UTC midnights from the day of `first` through the day of `last`
fn daily_labels(first: DateTime<Utc>, last: DateTime<Utc>) -> ScoringResult<Vec<DateTime<Utc>>> {
    let day = Duration::days(1);
    let start = first
        .duration_trunc(day)
        .map_err(|e| ScoringError::InvalidSeries(format!("cannot truncate {}: {}", first, e)))?;
    let end = last
        .duration_trunc(day)
        .map_err(|e| ScoringError::InvalidSeries(format!("cannot truncate {}: {}", last, e)))?;

    let mut labels = Vec::new();
    let mut label = start;
    while label <= end {
        labels.push(label);
        label += day;
    }
    Ok(labels)
}

/// Latest value at or before `at`
fn value_as_of(index: &[DateTime<Utc>], column: &[Option<f64>], at: DateTime<Utc>) -> Option<f64> {
    let upto = index.partition_point(|ts| *ts <= at);
    if upto == 0 {
        None
    } else {
        column[upto - 1]
    }
}
