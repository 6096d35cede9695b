//! Reference market data sources and score sinks
//!
//! - [`MemoryMarketData`] / [`MemoryScoreStore`]: in-process, for tests and
//!   embedding
//! - [`FileMarketData`] / [`FileScoreSink`]: directory-backed

mod file;
mod memory;

pub use file::{FileMarketData, FileScoreSink};
pub use memory::{MemoryMarketData, MemoryScoreStore};

use crate::models::{AvailabilityZone, CompositeScoreRecord, InstanceType, OperatingSystem, Region};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Selection over stored score records; `None` matches everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreFilter {
    pub region: Option<Region>,
    pub operating_system: Option<OperatingSystem>,
    pub availability_zones: Option<BTreeSet<AvailabilityZone>>,
    pub instance_types: Option<BTreeSet<InstanceType>>,
}

impl ScoreFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn operating_system(mut self, os: OperatingSystem) -> Self {
        self.operating_system = Some(os);
        self
    }

    pub fn availability_zone(mut self, az: impl Into<AvailabilityZone>) -> Self {
        self.availability_zones
            .get_or_insert_with(BTreeSet::new)
            .insert(az.into());
        self
    }

    pub fn instance_type(mut self, instance_type: impl Into<InstanceType>) -> Self {
        self.instance_types
            .get_or_insert_with(BTreeSet::new)
            .insert(instance_type.into());
        self
    }

    pub fn matches(&self, record: &CompositeScoreRecord) -> bool {
        self.region.as_ref().map_or(true, |r| *r == record.region)
            && self
                .operating_system
                .map_or(true, |os| os == record.operating_system)
            && self
                .availability_zones
                .as_ref()
                .map_or(true, |zones| zones.contains(&record.availability_zone))
            && self
                .instance_types
                .as_ref()
                .map_or(true, |types| types.contains(&record.instance_type))
    }
}
