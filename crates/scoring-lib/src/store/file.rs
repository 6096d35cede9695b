//! Directory-backed market data and score output
//!
//! Input layout under the data directory:
//!
//! ```text
//! catalog.json                                  {"regions": [...], "operating_systems": [...]}
//! ondemand.json                                 {region: {os: {instance_type: price}}}
//! spot_price_history/<region>/<os-slug>.json    [PricePoint, ...]
//! spot_advisor/advisor-YYYY-MM-DD.json          advisory feed document
//! ```
//!
//! Output layout under the output directory: `<region>_<os-slug>.json` per
//! partition and `advisor_scores.json`.

use crate::advisor::{AdvisorScore, AdvisoryData};
use crate::models::{decimal_price, CompositeScoreRecord, InstanceType, OperatingSystem, Partition, PricePoint, Region};
use crate::source::{async_trait, MarketDataSource, ScoreSink};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CATALOG_FILE: &str = "catalog.json";
const ON_DEMAND_FILE: &str = "ondemand.json";
const HISTORY_DIR: &str = "spot_price_history";
const ADVISOR_DIR: &str = "spot_advisor";
const ADVISOR_PREFIX: &str = "advisor-";
const ADVISOR_SCORES_FILE: &str = "advisor_scores.json";
const TEMP_PREFIX: &str = ".scores-";

#[derive(Debug, Deserialize)]
struct Catalog {
    regions: Vec<Region>,
    operating_systems: Vec<OperatingSystem>,
}

#[derive(Debug, Deserialize)]
struct Price(#[serde(deserialize_with = "decimal_price")] f64);

type OnDemandTable = HashMap<Region, HashMap<String, HashMap<InstanceType, Price>>>;

/// Market data read from JSON files
#[derive(Debug, Clone)]
pub struct FileMarketData {
    root: PathBuf,
}

impl FileMarketData {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_path(&self, partition: &Partition) -> PathBuf {
        self.root
            .join(HISTORY_DIR)
            .join(partition.region.as_str())
            .join(format!("{}.json", partition.operating_system.slug()))
    }

    async fn read_catalog(&self) -> Result<Catalog> {
        read_json(&self.root.join(CATALOG_FILE)).await
    }

    /// Snapshot for `date`, or the newest one published before it
    async fn advisory_path(&self, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.root.join(ADVISOR_DIR);
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to list advisory snapshots in {:?}", dir))?;

        let mut newest: Option<(NaiveDate, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(snapshot) = name.to_str().and_then(snapshot_date) else {
                continue;
            };
            if snapshot > date {
                continue;
            }
            if newest.as_ref().map_or(true, |(best, _)| snapshot > *best) {
                newest = Some((snapshot, entry.path()));
            }
        }

        let (snapshot, path) =
            newest.with_context(|| format!("No advisory snapshot on or before {} in {:?}", date, dir))?;
        if snapshot != date {
            info!(requested = %date, using = %snapshot, "Advisory snapshot missing, using newest earlier one");
        }
        Ok(path)
    }
}

/// Date of an `advisor-YYYY-MM-DD.json` file name
fn snapshot_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_prefix(ADVISOR_PREFIX)?.strip_suffix(".json")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

#[async_trait]
impl MarketDataSource for FileMarketData {
    async fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(self.read_catalog().await?.regions)
    }

    async fn list_operating_systems(&self) -> Result<Vec<OperatingSystem>> {
        Ok(self.read_catalog().await?.operating_systems)
    }

    async fn fetch_price_history(
        &self,
        partition: &Partition,
        lookback_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let path = self.history_path(partition);
        let points: Vec<PricePoint> = match read_json(&path).await {
            Ok(points) => points,
            Err(e) if is_not_found(&e) => {
                debug!(partition = %partition, path = ?path, "No price history file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let since = as_of - Duration::days(i64::from(lookback_days));
        Ok(points
            .into_iter()
            .filter(|p| p.timestamp > since && p.timestamp <= as_of)
            .collect())
    }

    async fn fetch_on_demand_prices(&self, partition: &Partition) -> Result<HashMap<InstanceType, f64>> {
        let mut table: OnDemandTable = read_json(&self.root.join(ON_DEMAND_FILE)).await?;
        let prices = table
            .remove(&partition.region)
            .and_then(|mut systems| {
                let os = partition.operating_system;
                systems
                    .remove(os.short_code())
                    .or_else(|| systems.remove(os.product_description()))
            })
            .unwrap_or_default();

        Ok(prices
            .into_iter()
            .map(|(instance_type, Price(price))| (instance_type, price))
            .collect())
    }

    async fn fetch_advisory_data(&self, date: NaiveDate) -> Result<AdvisoryData> {
        let path = self.advisory_path(date).await?;
        let json = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        Ok(AdvisoryData::from_feed_json(&json)?)
    }
}

/// Score output written as JSON files
///
/// Every write goes to a temporary file that is then renamed over the
/// previous one, so readers see either the old or the new partition.
#[derive(Debug, Clone)]
pub struct FileScoreSink {
    root: PathBuf,
}

impl FileScoreSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn partition_path(&self, partition: &Partition) -> PathBuf {
        self.root.join(format!(
            "{}_{}.json",
            partition.region,
            partition.operating_system.slug()
        ))
    }

    pub fn advisor_scores_path(&self) -> PathBuf {
        self.root.join(ADVISOR_SCORES_FILE)
    }

    pub async fn read_partition(&self, partition: &Partition) -> Result<Vec<CompositeScoreRecord>> {
        read_json(&self.partition_path(partition)).await
    }

    pub async fn read_advisor_scores(&self) -> Result<Vec<AdvisorScore>> {
        read_json(&self.advisor_scores_path()).await
    }
}

#[async_trait]
impl ScoreSink for FileScoreSink {
    async fn replace_partition_scores(
        &self,
        partition: &Partition,
        records: Vec<CompositeScoreRecord>,
    ) -> Result<()> {
        write_json_atomic(&self.partition_path(partition), &records).await
    }

    async fn replace_advisor_scores(&self, scores: Vec<AdvisorScore>) -> Result<()> {
        write_json_atomic(&self.advisor_scores_path(), &scores).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Malformed JSON in {:?}", path))
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map_or(false, |io| io.kind() == ErrorKind::NotFound)
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize scores")?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist_atomic(&path, &json))
        .await
        .context("Score writer panicked")?
}

/// Write through a uniquely named temporary file in the target directory,
/// then rename it over `path`
///
/// Concurrent writers to the same path each get their own temporary file;
/// the last rename wins and readers only ever see a complete file.
fn persist_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    file.write_all(bytes).context("Failed to write scores")?;
    file.as_file()
        .sync_all()
        .context("Failed to sync score file")?;

    file.persist(path)
        .with_context(|| format!("Failed to move temp file over {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdvisorPlatform;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    const FEED: &str = r#"{
        "global_rate": "<10%",
        "spot_advisor": {
            "us-east-1": {
                "Linux": {
                    "m5.large": {"r": 0, "s": 70},
                    "c5.large": {"r": 3, "s": 55}
                }
            }
        }
    }"#;

    async fn seed(dir: &Path) {
        fs::write(
            dir.join(CATALOG_FILE),
            r#"{"regions": ["us-east-1", "eu-west-1"], "operating_systems": ["linux", "Windows (Amazon VPC)"]}"#,
        )
        .await
        .unwrap();
        fs::write(
            dir.join(ON_DEMAND_FILE),
            r#"{"us-east-1": {"linux": {"m5.large": "0.096", "c5.large": 0.085}}}"#,
        )
        .await
        .unwrap();

        let history_dir = dir.join(HISTORY_DIR).join("us-east-1");
        fs::create_dir_all(&history_dir).await.unwrap();
        fs::write(
            history_dir.join("linux.json"),
            r#"[
                {"availability_zone": "us-east-1a", "instance_type": "m5.large", "price": "0.031", "timestamp": "2024-02-01T00:00:00Z"},
                {"availability_zone": "us-east-1a", "instance_type": "m5.large", "price": "0.032", "timestamp": "2024-03-20T00:00:00Z"},
                {"availability_zone": "us-east-1b", "instance_type": "m5.large", "price": 0.034, "timestamp": "2024-03-25T00:00:00Z"}
            ]"#,
        )
        .await
        .unwrap();

        let advisor_dir = dir.join(ADVISOR_DIR);
        fs::create_dir_all(&advisor_dir).await.unwrap();
        fs::write(advisor_dir.join("advisor-2024-03-28.json"), FEED).await.unwrap();
        fs::write(advisor_dir.join("advisor-2024-04-02.json"), FEED).await.unwrap();
        fs::write(advisor_dir.join("README.txt"), "not a snapshot").await.unwrap();
    }

    #[tokio::test]
    async fn test_catalog_is_read() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let market = FileMarketData::new(dir.path());

        let regions = market.list_regions().await.unwrap();
        assert_eq!(regions, vec![Region::new("us-east-1"), Region::new("eu-west-1")]);
        let systems = market.list_operating_systems().await.unwrap();
        assert_eq!(systems, vec![OperatingSystem::Linux, OperatingSystem::Windows]);
    }

    #[tokio::test]
    async fn test_history_filters_window_and_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let market = FileMarketData::new(dir.path());
        let as_of = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();

        let points = market
            .fetch_price_history(&Partition::new("us-east-1", OperatingSystem::Linux), 30, as_of)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert!((points[0].price - 0.032).abs() < 1e-12);

        let missing = market
            .fetch_price_history(&Partition::new("eu-west-1", OperatingSystem::Linux), 30, as_of)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_on_demand_prices_accept_strings_and_numbers() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let market = FileMarketData::new(dir.path());

        let prices = market
            .fetch_on_demand_prices(&Partition::new("us-east-1", OperatingSystem::Linux))
            .await
            .unwrap();
        assert_eq!(prices.len(), 2);
        assert!((prices[&InstanceType::new("m5.large")] - 0.096).abs() < 1e-12);

        let none = market
            .fetch_on_demand_prices(&Partition::new("us-east-1", OperatingSystem::Windows))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_advisory_falls_back_to_newest_earlier_snapshot() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let market = FileMarketData::new(dir.path());

        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let path = market.advisory_path(date).await.unwrap();
        assert!(path.ends_with("advisor-2024-03-28.json"));

        let advisory = market.fetch_advisory_data(date).await.unwrap();
        let entry = advisory
            .lookup(&Region::new("us-east-1"), AdvisorPlatform::Linux, &InstanceType::new("c5.large"))
            .unwrap();
        assert_eq!(entry.interruption_bucket, 3);

        let too_early = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(market.fetch_advisory_data(too_early).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_replaces_partition_file() {
        let dir = TempDir::new().unwrap();
        let sink = FileScoreSink::new(dir.path().join("scores"));
        let partition = Partition::new("us-east-1", OperatingSystem::Rhel);
        let record = |instance: &str, score| CompositeScoreRecord {
            region: "us-east-1".into(),
            operating_system: OperatingSystem::Rhel,
            instance_type: instance.into(),
            availability_zone: "us-east-1a".into(),
            score,
        };

        sink.replace_partition_scores(&partition, vec![record("m5.large", 10), record("c5.large", 80)])
            .await
            .unwrap();
        sink.replace_partition_scores(&partition, vec![record("r5.large", 55)])
            .await
            .unwrap();

        assert!(sink.partition_path(&partition).ends_with("us-east-1_rhel.json"));
        let stored = sink.read_partition(&partition).await.unwrap();
        assert_eq!(stored, vec![record("r5.large", 55)]);
        assert_eq!(temp_files(dir.path().join("scores")).await, 0);
    }

    async fn temp_files(dir: PathBuf) -> usize {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replaces_of_one_partition_all_succeed() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FileScoreSink::new(dir.path()));
        let partition = Partition::new("us-east-1", OperatingSystem::Linux);
        let batch = |writer: u8| -> Vec<CompositeScoreRecord> {
            (0..2_000)
                .map(|i| CompositeScoreRecord {
                    region: "us-east-1".into(),
                    operating_system: OperatingSystem::Linux,
                    instance_type: format!("m5.{}xlarge", i).into(),
                    availability_zone: "us-east-1a".into(),
                    score: writer,
                })
                .collect()
        };

        for _ in 0..10 {
            let writers: Vec<_> = (0..4u8)
                .map(|writer| {
                    let sink = sink.clone();
                    let partition = partition.clone();
                    let records = batch(writer);
                    tokio::spawn(async move { sink.replace_partition_scores(&partition, records).await })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap().unwrap();
            }

            let stored = sink.read_partition(&partition).await.unwrap();
            assert_eq!(stored.len(), 2_000);
            let owner = stored[0].score;
            assert!(stored.iter().all(|r| r.score == owner));
        }

        assert_eq!(temp_files(dir.path().to_path_buf()).await, 0);
    }

    #[tokio::test]
    async fn test_sink_writes_advisor_scores() {
        let dir = TempDir::new().unwrap();
        let sink = FileScoreSink::new(dir.path());
        let scores = vec![AdvisorScore {
            region: "us-east-1".into(),
            platform: AdvisorPlatform::Linux,
            instance_type: "m5.large".into(),
            score: 1.0,
        }];

        sink.replace_advisor_scores(scores.clone()).await.unwrap();
        assert_eq!(sink.read_advisor_scores().await.unwrap(), scores);
    }

    #[test]
    fn test_snapshot_date_parsing() {
        assert_eq!(
            snapshot_date("advisor-2024-03-28.json"),
            NaiveDate::from_ymd_opt(2024, 3, 28)
        );
        assert_eq!(snapshot_date("advisor-latest.json"), None);
        assert_eq!(snapshot_date("scores-2024-03-28.json"), None);
    }
}
