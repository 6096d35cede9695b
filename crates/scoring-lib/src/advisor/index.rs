//! Normalized advisory scores

use super::{AdvisorFilter, AdvisoryData, AdvisoryRecord};
use crate::error::{ScoringError, ScoringResult};
use crate::models::{AdvisorPlatform, InstanceType, Region};
use crate::normalize::{min_max, min_max_by_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of entries with an interruption bucket below this counts as stable
const STABLE_BUCKET_LIMIT: u8 = 2;

/// Scoring model applied to the advisory feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorModel {
    /// Region and instance-type aggregates within each platform cohort
    #[default]
    Cohort,
    /// Per-entry closed form over bucket and savings
    Direct,
}

/// Model choice and non-negative component weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorPolicy {
    pub model: AdvisorModel,
    pub savings_weight: f64,
    pub interruption_weight: f64,
    pub instance_weight: f64,
    pub region_weight: f64,
}

impl Default for AdvisorPolicy {
    fn default() -> Self {
        Self {
            model: AdvisorModel::Cohort,
            savings_weight: 1.0,
            interruption_weight: 1.0,
            instance_weight: 1.0,
            region_weight: 0.1,
        }
    }
}

impl AdvisorPolicy {
    pub fn validate(&self) -> ScoringResult<()> {
        let weights = [
            ("savings_weight", self.savings_weight),
            ("interruption_weight", self.interruption_weight),
            ("instance_weight", self.instance_weight),
            ("region_weight", self.region_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ScoringError::InvalidPolicy(format!(
                    "{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

/// One normalized advisory score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorScore {
    pub region: Region,
    pub platform: AdvisorPlatform,
    pub instance_type: InstanceType,
    /// In [0, 1] across the whole snapshot
    pub score: f64,
}

type ScoreKey = (Region, AdvisorPlatform, InstanceType);

/// Normalized scores for every entry of one advisory snapshot
#[derive(Debug, Clone, Default)]
pub struct AdvisorScoreIndex {
    model: AdvisorModel,
    scores: BTreeMap<ScoreKey, f64>,
}

impl AdvisorScoreIndex {
    pub fn build(data: &AdvisoryData, policy: &AdvisorPolicy) -> ScoringResult<Self> {
        policy.validate()?;

        let records: Vec<AdvisoryRecord<'_>> = data.records().collect();
        let raw = match policy.model {
            AdvisorModel::Cohort => cohort_scores(&records, policy),
            AdvisorModel::Direct => direct_scores(&records, policy),
        };
        let normalized = min_max(&raw);

        let scores = records
            .iter()
            .zip(normalized)
            .map(|(r, score)| ((r.region.clone(), r.platform, r.instance_type.clone()), score))
            .collect();

        Ok(Self {
            model: policy.model,
            scores,
        })
    }

    pub fn model(&self) -> AdvisorModel {
        self.model
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, region: &Region, platform: AdvisorPlatform, instance_type: &InstanceType) -> Option<f64> {
        self.scores
            .get(&(region.clone(), platform, instance_type.clone()))
            .copied()
    }

    /// Scores matching a filter, in key order
    pub fn fetch_scores(&self, filter: &AdvisorFilter) -> Vec<AdvisorScore> {
        self.scores
            .iter()
            .filter(|((region, platform, instance_type), _)| {
                filter.matches(region, *platform, instance_type)
            })
            .map(|((region, platform, instance_type), score)| AdvisorScore {
                region: region.clone(),
                platform: *platform,
                instance_type: instance_type.clone(),
                score: *score,
            })
            .collect()
    }
}

/// `savings * 7 * s + interruption * exp(2 - r / 2)`
fn direct_scores(records: &[AdvisoryRecord<'_>], policy: &AdvisorPolicy) -> Vec<f64> {
    records
        .iter()
        .map(|r| {
            policy.savings_weight * 7.0 * r.entry.savings_percent
                + policy.interruption_weight
                    * (2.0 - f64::from(r.entry.interruption_bucket) / 2.0).exp()
        })
        .collect()
}

/// Normalized stability and savings aggregates of one grouping
struct GroupScores<K> {
    stable: BTreeMap<K, f64>,
    savings: BTreeMap<K, f64>,
}

fn group_scores<'r, 'a: 'r, K, F>(
    records: impl Iterator<Item = &'r AdvisoryRecord<'a>>,
    key: F,
) -> GroupScores<K>
where
    K: Ord + Clone,
    F: Fn(&AdvisoryRecord<'a>) -> K,
{
    let mut tallies: BTreeMap<K, (usize, usize, f64)> = BTreeMap::new();
    for record in records {
        let tally = tallies.entry(key(record)).or_insert((0, 0, 0.0));
        tally.0 += 1;
        if record.entry.interruption_bucket < STABLE_BUCKET_LIMIT {
            tally.1 += 1;
        }
        tally.2 += record.entry.savings_percent;
    }

    let stable = tallies
        .iter()
        .map(|(k, (n, stable, _))| (k.clone(), *stable as f64 / *n as f64))
        .collect();
    let savings = tallies
        .iter()
        .map(|(k, (n, _, sum))| (k.clone(), sum / *n as f64))
        .collect();

    GroupScores {
        stable: min_max_by_key(&stable),
        savings: min_max_by_key(&savings),
    }
}

/// Weighted sum of region and instance-type aggregates within each platform
fn cohort_scores(records: &[AdvisoryRecord<'_>], policy: &AdvisorPolicy) -> Vec<f64> {
    let mut by_platform: BTreeMap<AdvisorPlatform, (GroupScores<Region>, GroupScores<InstanceType>)> =
        BTreeMap::new();
    for platform in records.iter().map(|r| r.platform) {
        if by_platform.contains_key(&platform) {
            continue;
        }
        let cohort = || records.iter().filter(move |r| r.platform == platform);
        let regions = group_scores(cohort(), |r| r.region.clone());
        let instances = group_scores(cohort(), |r| r.instance_type.clone());
        by_platform.insert(platform, (regions, instances));
    }

    let (ri, si) = (policy.interruption_weight, policy.savings_weight);
    let (ig, rg) = (policy.instance_weight, policy.region_weight);

    records
        .iter()
        .map(|r| {
            let Some((regions, instances)) = by_platform.get(&r.platform) else {
                return 0.0;
            };
            ri * rg * weight_of(&regions.stable, r.region)
                + si * rg * weight_of(&regions.savings, r.region)
                + ri * ig * weight_of(&instances.stable, r.instance_type)
                + si * ig * weight_of(&instances.savings, r.instance_type)
        })
        .collect()
}

fn weight_of<K: Ord>(scores: &BTreeMap<K, f64>, key: &K) -> f64 {
    scores.get(key).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::AdvisorFilter;
    use crate::models::{AdvisoryEntry, OperatingSystem};

    fn sample() -> AdvisoryData {
        let mut data = AdvisoryData::new();
        data.insert("us-east-1", AdvisorPlatform::Linux, "m5.large", AdvisoryEntry::new(0, 70.0));
        data.insert("us-east-1", AdvisorPlatform::Linux, "c5.large", AdvisoryEntry::new(3, 40.0));
        data.insert("us-west-2", AdvisorPlatform::Linux, "m5.large", AdvisoryEntry::new(1, 60.0));
        data.insert("us-west-2", AdvisorPlatform::Linux, "c5.large", AdvisoryEntry::new(4, 20.0));
        data.insert("us-east-1", AdvisorPlatform::Windows, "m5.large", AdvisoryEntry::new(2, 30.0));
        data
    }

    fn score(index: &AdvisorScoreIndex, region: &str, platform: AdvisorPlatform, instance: &str) -> f64 {
        index.score(&region.into(), platform, &instance.into()).unwrap()
    }

    #[test]
    fn test_direct_model_formula_and_bounds() {
        let policy = AdvisorPolicy {
            model: AdvisorModel::Direct,
            ..AdvisorPolicy::default()
        };
        let index = AdvisorScoreIndex::build(&sample(), &policy).unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.model(), AdvisorModel::Direct);
        // Highest savings with the lowest bucket tops the set
        assert_eq!(score(&index, "us-east-1", AdvisorPlatform::Linux, "m5.large"), 1.0);
        assert_eq!(score(&index, "us-west-2", AdvisorPlatform::Linux, "c5.large"), 0.0);
        let all = index.fetch_scores(&AdvisorFilter::all());
        assert!(all.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }

    #[test]
    fn test_cohort_model_ranks_stable_cheap_instances_first() {
        let index = AdvisorScoreIndex::build(&sample(), &AdvisorPolicy::default()).unwrap();

        let m5_east = score(&index, "us-east-1", AdvisorPlatform::Linux, "m5.large");
        let c5_east = score(&index, "us-east-1", AdvisorPlatform::Linux, "c5.large");
        let c5_west = score(&index, "us-west-2", AdvisorPlatform::Linux, "c5.large");
        assert_eq!(m5_east, 1.0);
        assert!(m5_east > c5_east);
        assert!(c5_east > c5_west);
        assert_eq!(c5_west, 0.0);
    }

    #[test]
    fn test_single_member_cohort_is_degenerate_not_nan() {
        let index = AdvisorScoreIndex::build(&sample(), &AdvisorPolicy::default()).unwrap();
        let windows = score(&index, "us-east-1", AdvisorPlatform::Windows, "m5.large");
        assert!(!windows.is_nan());
        assert_eq!(windows, 0.0);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let policy = AdvisorPolicy {
            region_weight: -0.5,
            ..AdvisorPolicy::default()
        };
        assert!(matches!(
            AdvisorScoreIndex::build(&sample(), &policy),
            Err(ScoringError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_fetch_scores_filters() {
        let index = AdvisorScoreIndex::build(&sample(), &AdvisorPolicy::default()).unwrap();

        let windows = index.fetch_scores(&AdvisorFilter::all().operating_system(OperatingSystem::Windows));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].platform, AdvisorPlatform::Windows);

        let west = index.fetch_scores(&AdvisorFilter::all().region("us-west-2").instance_type("c5.large"));
        assert_eq!(west.len(), 1);
        assert_eq!(west[0].score, 0.0);
    }

    #[test]
    fn test_empty_snapshot_builds_empty_index() {
        let index = AdvisorScoreIndex::build(&AdvisoryData::new(), &AdvisorPolicy::default()).unwrap();
        assert!(index.is_empty());
    }
}
