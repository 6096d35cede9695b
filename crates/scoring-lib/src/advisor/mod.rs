//! Interruption and savings advisory data
//!
//! The advisory feed publishes, per region and platform, an interruption
//! bucket and a savings percentage for every instance type. [`AdvisoryData`]
//! holds one snapshot of that feed; [`AdvisorScoreIndex`] turns it into
//! normalized, comparable scores.

mod index;

pub use index::{AdvisorModel, AdvisorPolicy, AdvisorScore, AdvisorScoreIndex};

use crate::error::{ScoringError, ScoringResult};
use crate::models::{AdvisorPlatform, AdvisoryEntry, InstanceType, OperatingSystem, Partition, Region};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

type PlatformEntries = BTreeMap<AdvisorPlatform, BTreeMap<InstanceType, AdvisoryEntry>>;

/// One snapshot of the advisory feed, keyed region → platform → instance type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdvisoryData {
    regions: BTreeMap<Region, PlatformEntries>,
}

/// Feed document wrapper; other top-level keys are ignored
#[derive(Deserialize)]
struct AdvisoryFeed {
    spot_advisor: AdvisoryData,
}

impl AdvisoryData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a feed document of the form `{"spot_advisor": {region: {...}}}`
    pub fn from_feed_json(json: &str) -> ScoringResult<Self> {
        let feed: AdvisoryFeed = serde_json::from_str(json)
            .map_err(|e| ScoringError::Source(anyhow::anyhow!("malformed advisory feed: {}", e)))?;
        feed.spot_advisor.validated()
    }

    /// Reject entries outside the documented value ranges
    pub fn validated(self) -> ScoringResult<Self> {
        for record in self.records() {
            let entry = record.entry;
            if entry.interruption_bucket > AdvisoryEntry::MAX_BUCKET
                || !entry.savings_percent.is_finite()
            {
                return Err(ScoringError::Source(anyhow::anyhow!(
                    "advisory entry out of range for {}/{}/{}: r={} s={}",
                    record.region,
                    record.platform,
                    record.instance_type,
                    entry.interruption_bucket,
                    entry.savings_percent
                )));
            }
        }
        Ok(self)
    }

    pub fn insert(
        &mut self,
        region: impl Into<Region>,
        platform: AdvisorPlatform,
        instance_type: impl Into<InstanceType>,
        entry: AdvisoryEntry,
    ) {
        self.regions
            .entry(region.into())
            .or_default()
            .entry(platform)
            .or_default()
            .insert(instance_type.into(), entry);
    }

    pub fn lookup(
        &self,
        region: &Region,
        platform: AdvisorPlatform,
        instance_type: &InstanceType,
    ) -> Option<&AdvisoryEntry> {
        self.regions.get(region)?.get(&platform)?.get(instance_type)
    }

    /// Entry for an instance type as seen from one partition
    pub fn lookup_for(&self, partition: &Partition, instance_type: &InstanceType) -> Option<&AdvisoryEntry> {
        self.lookup(
            &partition.region,
            partition.operating_system.advisor_platform(),
            instance_type,
        )
    }

    /// All entries, flattened in key order
    pub fn records(&self) -> impl Iterator<Item = AdvisoryRecord<'_>> {
        self.regions.iter().flat_map(|(region, platforms)| {
            platforms.iter().flat_map(move |(platform, instances)| {
                instances.iter().map(move |(instance_type, entry)| AdvisoryRecord {
                    region,
                    platform: *platform,
                    instance_type,
                    entry: *entry,
                })
            })
        })
    }

    /// Raw entries matching a filter
    pub fn filter<'a>(&'a self, filter: &'a AdvisorFilter) -> impl Iterator<Item = AdvisoryRecord<'a>> {
        self.records()
            .filter(move |r| filter.matches(r.region, r.platform, r.instance_type))
    }

    pub fn len(&self) -> usize {
        self.regions
            .values()
            .flat_map(|p| p.values())
            .map(|i| i.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed view of one advisory entry with its keys
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvisoryRecord<'a> {
    pub region: &'a Region,
    pub platform: AdvisorPlatform,
    pub instance_type: &'a InstanceType,
    pub entry: AdvisoryEntry,
}

/// Optional region / operating system / instance type sets; `None` matches all
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorFilter {
    pub regions: Option<BTreeSet<Region>>,
    pub operating_systems: Option<BTreeSet<OperatingSystem>>,
    pub instance_types: Option<BTreeSet<InstanceType>>,
}

impl AdvisorFilter {
    /// Wildcard filter
    pub fn all() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.regions.get_or_insert_with(BTreeSet::new).insert(region.into());
        self
    }

    pub fn operating_system(mut self, os: OperatingSystem) -> Self {
        self.operating_systems.get_or_insert_with(BTreeSet::new).insert(os);
        self
    }

    pub fn instance_type(mut self, instance_type: impl Into<InstanceType>) -> Self {
        self.instance_types
            .get_or_insert_with(BTreeSet::new)
            .insert(instance_type.into());
        self
    }

    pub fn matches(&self, region: &Region, platform: AdvisorPlatform, instance_type: &InstanceType) -> bool {
        self.regions.as_ref().map_or(true, |set| set.contains(region))
            && self.operating_systems.as_ref().map_or(true, |set| {
                set.iter().any(|os| os.advisor_platform() == platform)
            })
            && self
                .instance_types
                .as_ref()
                .map_or(true, |set| set.contains(instance_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{
        "global_rate": "<5%",
        "spot_advisor": {
            "us-east-1": {
                "Linux": {
                    "m5.large": {"r": 0, "s": 70},
                    "c5.large": {"r": 3, "s": 45}
                },
                "Windows": {
                    "m5.large": {"r": 1, "s": 50}
                }
            },
            "eu-west-1": {
                "Linux": {
                    "m5.large": {"r": 2, "s": 60}
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_feed_document() {
        let data = AdvisoryData::from_feed_json(FEED).unwrap();
        assert_eq!(data.len(), 4);
        let entry = data
            .lookup(&"us-east-1".into(), AdvisorPlatform::Linux, &"c5.large".into())
            .unwrap();
        assert_eq!(entry.interruption_bucket, 3);
        assert_eq!(entry.savings_percent, 45.0);
    }

    #[test]
    fn test_out_of_range_bucket_rejected() {
        let bad = FEED.replace(r#""r": 3"#, r#""r": 9"#);
        assert!(matches!(
            AdvisoryData::from_feed_json(&bad),
            Err(ScoringError::Source(_))
        ));
        assert!(AdvisoryData::from_feed_json("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_partition_lookup_goes_through_platform() {
        let data = AdvisoryData::from_feed_json(FEED).unwrap();
        let rhel = Partition::new("us-east-1", OperatingSystem::Rhel);
        let windows = Partition::new("us-east-1", OperatingSystem::Windows);

        assert_eq!(data.lookup_for(&rhel, &"m5.large".into()).unwrap().savings_percent, 70.0);
        assert_eq!(data.lookup_for(&windows, &"m5.large".into()).unwrap().savings_percent, 50.0);
        assert!(data.lookup_for(&windows, &"c5.large".into()).is_none());
    }

    #[test]
    fn test_filter_wildcards_and_sets() {
        let data = AdvisoryData::from_feed_json(FEED).unwrap();

        assert_eq!(data.filter(&AdvisorFilter::all()).count(), 4);

        let filter = AdvisorFilter::all()
            .region("us-east-1")
            .operating_system(OperatingSystem::Linux);
        let instances: Vec<_> = data
            .filter(&filter)
            .map(|r| r.instance_type.as_str().to_string())
            .collect();
        assert_eq!(instances, vec!["c5.large", "m5.large"]);

        let filter = AdvisorFilter::all().instance_type("m5.large");
        assert_eq!(data.filter(&filter).count(), 3);
    }
}
