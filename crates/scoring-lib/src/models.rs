//! Core data models for spot market scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Cloud region code, e.g. `us-east-1`
    Region
);
string_id!(
    /// Instance type name, e.g. `m5.large`
    InstanceType
);
string_id!(
    /// Availability zone name, e.g. `us-east-1a`
    AvailabilityZone
);

/// Operating system product offered on spot capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperatingSystem {
    #[serde(rename = "Linux/UNIX (Amazon VPC)", alias = "linux")]
    Linux,
    #[serde(rename = "SUSE Linux (Amazon VPC)", alias = "suse")]
    Suse,
    #[serde(rename = "Red Hat Enterprise Linux (Amazon VPC)", alias = "rhel")]
    Rhel,
    #[serde(rename = "Windows (Amazon VPC)", alias = "windows")]
    Windows,
}

impl OperatingSystem {
    pub const ALL: [OperatingSystem; 4] = [
        OperatingSystem::Linux,
        OperatingSystem::Suse,
        OperatingSystem::Rhel,
        OperatingSystem::Windows,
    ];

    /// Product description as used by the pricing and price-history feeds
    pub fn product_description(&self) -> &'static str {
        match self {
            OperatingSystem::Linux => "Linux/UNIX (Amazon VPC)",
            OperatingSystem::Suse => "SUSE Linux (Amazon VPC)",
            OperatingSystem::Rhel => "Red Hat Enterprise Linux (Amazon VPC)",
            OperatingSystem::Windows => "Windows (Amazon VPC)",
        }
    }

    pub fn short_code(&self) -> &'static str {
        match self {
            OperatingSystem::Linux => "linux",
            OperatingSystem::Suse => "suse",
            OperatingSystem::Rhel => "rhel",
            OperatingSystem::Windows => "windows",
        }
    }

    /// File-name safe identifier
    pub fn slug(&self) -> &'static str {
        self.short_code()
    }

    /// Platform key under which the advisory feed publishes this system
    pub fn advisor_platform(&self) -> AdvisorPlatform {
        match self {
            OperatingSystem::Windows => AdvisorPlatform::Windows,
            _ => AdvisorPlatform::Linux,
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_description())
    }
}

impl FromStr for OperatingSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        OperatingSystem::ALL
            .into_iter()
            .find(|os| {
                os.product_description() == trimmed || os.short_code().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| format!("unknown operating system: {}", s))
    }
}

/// Platform grouping used by the interruption advisory feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AdvisorPlatform {
    Linux,
    Windows,
}

impl fmt::Display for AdvisorPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisorPlatform::Linux => f.write_str("Linux"),
            AdvisorPlatform::Windows => f.write_str("Windows"),
        }
    }
}

/// One (region, operating system) pair, the unit of independent computation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub region: Region,
    pub operating_system: OperatingSystem,
}

impl Partition {
    pub fn new(region: impl Into<Region>, operating_system: OperatingSystem) -> Self {
        Self {
            region: region.into(),
            operating_system,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.operating_system.short_code())
    }
}

/// A single observed spot price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub availability_zone: AvailabilityZone,
    pub instance_type: InstanceType,
    #[serde(deserialize_with = "decimal_price")]
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(
        availability_zone: impl Into<AvailabilityZone>,
        instance_type: impl Into<InstanceType>,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            availability_zone: availability_zone.into(),
            instance_type: instance_type.into(),
            price,
            timestamp,
        }
    }
}

/// Look-back period for rolling statistics, measured in daily rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StatisticsPeriod {
    Day,
    Week,
    TwoWeeks,
    #[default]
    Month,
    ThreeMonths,
}

impl StatisticsPeriod {
    pub fn rows(&self) -> usize {
        match self {
            StatisticsPeriod::Day => 1,
            StatisticsPeriod::Week => 7,
            StatisticsPeriod::TwoWeeks => 14,
            StatisticsPeriod::Month => 30,
            StatisticsPeriod::ThreeMonths => 90,
        }
    }
}

impl FromStr for StatisticsPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Day" => Ok(StatisticsPeriod::Day),
            "Week" => Ok(StatisticsPeriod::Week),
            "TwoWeeks" | "2 Weeks" => Ok(StatisticsPeriod::TwoWeeks),
            "Month" => Ok(StatisticsPeriod::Month),
            "ThreeMonths" | "3 Months" => Ok(StatisticsPeriod::ThreeMonths),
            other => Err(format!(
                "unknown period {:?}, expected one of Day, Week, TwoWeeks, Month, ThreeMonths",
                other
            )),
        }
    }
}

/// Rolling mean and standard deviation of one availability-zone column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Interruption and savings advisory for one instance type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryEntry {
    /// 0 = <5% interruption likelihood ... 4 = >20%
    #[serde(rename = "r")]
    pub interruption_bucket: u8,
    /// Savings over on-demand, in percent
    #[serde(rename = "s")]
    pub savings_percent: f64,
}

impl AdvisoryEntry {
    pub const MAX_BUCKET: u8 = 4;

    pub fn new(interruption_bucket: u8, savings_percent: f64) -> Self {
        Self {
            interruption_bucket,
            savings_percent,
        }
    }
}

/// Final public score for one capacity pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeScoreRecord {
    pub region: Region,
    pub operating_system: OperatingSystem,
    pub instance_type: InstanceType,
    pub availability_zone: AvailabilityZone,
    /// Integer in [0, 100]
    pub score: u8,
}

/// Accept prices either as JSON numbers or as decimal strings ("0.0312")
pub(crate) fn decimal_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid price {:?}: {}", s, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operating_system_parsing() {
        assert_eq!("linux".parse::<OperatingSystem>(), Ok(OperatingSystem::Linux));
        assert_eq!(
            "Windows (Amazon VPC)".parse::<OperatingSystem>(),
            Ok(OperatingSystem::Windows)
        );
        assert_eq!("RHEL".parse::<OperatingSystem>(), Ok(OperatingSystem::Rhel));
        assert!("beos".parse::<OperatingSystem>().is_err());
    }

    #[test]
    fn test_advisor_platform_mapping() {
        assert_eq!(OperatingSystem::Suse.advisor_platform(), AdvisorPlatform::Linux);
        assert_eq!(OperatingSystem::Rhel.advisor_platform(), AdvisorPlatform::Linux);
        assert_eq!(
            OperatingSystem::Windows.advisor_platform(),
            AdvisorPlatform::Windows
        );
    }

    #[test]
    fn test_price_point_accepts_string_prices() {
        let json = r#"{
            "availability_zone": "us-east-1a",
            "instance_type": "m5.large",
            "price": "0.0312",
            "timestamp": "2024-03-01T00:00:00Z"
        }"#;
        let point: PricePoint = serde_json::from_str(json).unwrap();
        assert!((point.price - 0.0312).abs() < 1e-12);

        let bad = json.replace("\"0.0312\"", "\"cheap\"");
        assert!(serde_json::from_str::<PricePoint>(&bad).is_err());
    }

    #[test]
    fn test_period_rows() {
        assert_eq!(StatisticsPeriod::Month.rows(), 30);
        assert_eq!("3 Months".parse::<StatisticsPeriod>(), Ok(StatisticsPeriod::ThreeMonths));
        assert_eq!(StatisticsPeriod::default(), StatisticsPeriod::Month);
    }

    #[test]
    fn test_operating_system_serde_names() {
        let json = serde_json::to_string(&OperatingSystem::Linux).unwrap();
        assert_eq!(json, "\"Linux/UNIX (Amazon VPC)\"");
        let parsed: OperatingSystem = serde_json::from_str("\"suse\"").unwrap();
        assert_eq!(parsed, OperatingSystem::Suse);
    }
}
