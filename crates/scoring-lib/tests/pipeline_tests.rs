//! End-to-end scoring runs against the reference adapters

use chrono::{DateTime, Duration, TimeZone, Utc};
use scoring_lib::{
    AdvisorPlatform, AdvisoryData, AdvisoryEntry, FileMarketData, FileScoreSink, HealthRegistry,
    MemoryMarketData, MemoryScoreStore, OperatingSystem, Partition, PartitionOutcome, PricePoint,
    ScoreFilter, ScoringConfig, ScoringOrchestrator, StructuredLogger,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Handle;

const REGION: &str = "us-east-1";

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
}

fn linux() -> Partition {
    Partition::new(REGION, OperatingSystem::Linux)
}

/// Daily prices for 20 days with a small alternating wobble
fn daily_points(az: &str, instance: &str, base: f64, wobble: f64) -> Vec<PricePoint> {
    (1..=20)
        .map(|day| {
            let offset = if day % 2 == 0 { wobble } else { -wobble };
            PricePoint::new(az, instance, base + offset, as_of() - Duration::days(day))
        })
        .collect()
}

/// One partition with a clearly preferable instance type (m5), a clearly
/// worse one (c5) and one without an on-demand price (r5)
fn seeded_market(wobble: f64) -> MemoryMarketData {
    let partition = linux();
    let mut advisory = AdvisoryData::new();
    advisory.insert(REGION, AdvisorPlatform::Linux, "m5.large", AdvisoryEntry::new(0, 70.0));
    advisory.insert(REGION, AdvisorPlatform::Linux, "c5.large", AdvisoryEntry::new(4, 10.0));
    advisory.insert(REGION, AdvisorPlatform::Linux, "r5.large", AdvisoryEntry::new(1, 40.0));

    let market = MemoryMarketData::new()
        .with_regions([REGION])
        .with_operating_systems([OperatingSystem::Linux, OperatingSystem::Windows])
        .with_advisory_data(advisory);

    for az in ["us-east-1a", "us-east-1b"] {
        market.add_price_history(&partition, daily_points(az, "m5.large", 0.03, wobble));
        market.add_price_history(&partition, daily_points(az, "c5.large", 0.09, wobble));
    }
    market.add_price_history(&partition, daily_points("us-east-1a", "r5.large", 0.05, wobble));

    market.set_on_demand_price(&partition, "m5.large", 0.10);
    market.set_on_demand_price(&partition, "c5.large", 0.10);
    market
}

fn orchestrator(
    market: Arc<MemoryMarketData>,
    store: Arc<MemoryScoreStore>,
    config: ScoringConfig,
) -> ScoringOrchestrator {
    ScoringOrchestrator::new(
        market,
        store,
        config,
        Handle::current(),
        HealthRegistry::new(),
        StructuredLogger::new("pipeline-test"),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dominant_instance_scores_top_and_dominated_bottom() {
    let store = Arc::new(MemoryScoreStore::new());
    let summary = orchestrator(Arc::new(seeded_market(0.0005)), store.clone(), ScoringConfig::default())
        .run_at(as_of())
        .await
        .unwrap();

    let outcome = summary.outcome(&linux()).unwrap();
    let PartitionOutcome::Scored(report) = outcome else {
        panic!("partition should be scored: {:?}", outcome);
    };
    assert_eq!(report.records_written, 4);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].instance_type.as_str(), "r5.large");

    let m5 = store.query(&ScoreFilter::all().instance_type("m5.large"));
    let c5 = store.query(&ScoreFilter::all().instance_type("c5.large"));
    assert_eq!(m5.len(), 2);
    assert_eq!(c5.len(), 2);
    assert!(m5.iter().all(|r| r.score == 100));
    assert!(c5.iter().all(|r| r.score == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_without_history_fails_alone() {
    let store = Arc::new(MemoryScoreStore::new());
    let summary = orchestrator(Arc::new(seeded_market(0.0005)), store.clone(), ScoringConfig::default())
        .run_at(as_of())
        .await
        .unwrap();

    let windows = Partition::new(REGION, OperatingSystem::Windows);
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.scored(), 1);
    assert!(!summary.outcome(&windows).unwrap().is_scored());
    assert!(store.partition(&windows).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rerun_replaces_instead_of_accumulating() {
    let market = Arc::new(seeded_market(0.0005));
    let store = Arc::new(MemoryScoreStore::new());
    let orchestrator = orchestrator(market, store.clone(), ScoringConfig::default());

    orchestrator.run_at(as_of()).await.unwrap();
    let first = store.partition(&linux()).unwrap();
    orchestrator.run_at(as_of()).await.unwrap();
    let second = store.partition(&linux()).unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_rerun_keeps_previous_scores() {
    let market = Arc::new(seeded_market(0.0005));
    let store = Arc::new(MemoryScoreStore::new());
    let orchestrator = orchestrator(market.clone(), store.clone(), ScoringConfig::default());

    orchestrator.run_at(as_of()).await.unwrap();
    let before = store.partition(&linux()).unwrap();

    market.fail_partition(&linux());
    let summary = orchestrator.run_at(as_of()).await.unwrap();
    assert!(!summary.outcome(&linux()).unwrap().is_scored());
    assert_eq!(store.partition(&linux()).unwrap(), before);

    market.restore_partition(&linux());
    store.reject_partition(&linux());
    let summary = orchestrator.run_at(as_of()).await.unwrap();
    assert!(!summary.outcome(&linux()).unwrap().is_scored());
    assert_eq!(store.partition(&linux()).unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_modelled_forecasts_are_deterministic() {
    let wobble = 0.004;
    let mut config = ScoringConfig::default();
    config.forecast.trees = 10;
    config.forecast.variance_threshold = 0.0;

    let first_store = Arc::new(MemoryScoreStore::new());
    let first = orchestrator(Arc::new(seeded_market(wobble)), first_store.clone(), config.clone())
        .run_at(as_of())
        .await
        .unwrap();
    let second_store = Arc::new(MemoryScoreStore::new());
    orchestrator(Arc::new(seeded_market(wobble)), second_store.clone(), config)
        .run_at(as_of())
        .await
        .unwrap();

    assert_eq!(first.scored(), 1);
    let records = first_store.partition(&linux()).unwrap();
    assert!(records.iter().all(|r| r.score <= 100));
    assert_eq!(records, second_store.partition(&linux()).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_adapters_end_to_end() {
    let data = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let root = data.path();

    std::fs::write(
        root.join("catalog.json"),
        r#"{"regions": ["us-east-1"], "operating_systems": ["linux"]}"#,
    )
    .unwrap();
    std::fs::write(
        root.join("ondemand.json"),
        r#"{"us-east-1": {"linux": {"m5.large": "0.10", "c5.large": "0.10"}}}"#,
    )
    .unwrap();

    let mut history = daily_points("us-east-1a", "m5.large", 0.03, 0.0005);
    history.extend(daily_points("us-east-1a", "c5.large", 0.09, 0.0005));
    std::fs::create_dir_all(root.join("spot_price_history/us-east-1")).unwrap();
    std::fs::write(
        root.join("spot_price_history/us-east-1/linux.json"),
        serde_json::to_vec(&history).unwrap(),
    )
    .unwrap();

    std::fs::create_dir_all(root.join("spot_advisor")).unwrap();
    std::fs::write(
        root.join("spot_advisor/advisor-2024-03-30.json"),
        r#"{"spot_advisor": {"us-east-1": {"Linux": {
            "m5.large": {"r": 0, "s": 70},
            "c5.large": {"r": 4, "s": 10}
        }}}}"#,
    )
    .unwrap();

    let sink = Arc::new(FileScoreSink::new(output.path()));
    let summary = ScoringOrchestrator::new(
        Arc::new(FileMarketData::new(root)),
        sink.clone(),
        ScoringConfig::default(),
        Handle::current(),
        HealthRegistry::new(),
        StructuredLogger::new("pipeline-test"),
    )
    .unwrap()
    .run_at(as_of())
    .await
    .unwrap();

    assert_eq!(summary.scored(), 1);
    let records = sink.read_partition(&linux()).await.unwrap();
    assert_eq!(records.len(), 2);
    let best = records.iter().max_by_key(|r| r.score).unwrap();
    assert_eq!(best.instance_type.as_str(), "m5.large");
    assert_eq!(best.score, 100);

    let advisor_scores = sink.read_advisor_scores().await.unwrap();
    assert_eq!(advisor_scores.len(), 2);
}
