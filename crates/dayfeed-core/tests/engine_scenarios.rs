//! End-to-end scenarios against the public API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;

use dayfeed_core::content::ContentRecord;
use dayfeed_core::lifecycle::SHUTDOWN_MARKER_KEY;
use dayfeed_core::strategy::{OptimizationStrategyKind, UsagePattern};
use dayfeed_core::sync::Backoff;
use dayfeed_core::timezone::TimezoneResolver;
use dayfeed_core::{
    CacheConfig, ContentSource, Coordinator, DeviceHints, Environment, FileStore, KeyValueStore, MemoryStore,
    OptimizationTrigger, RemoteContent, SourceError,
};

/// Source that is either reachable and serves one item, or offline.
struct FakeSource {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContentSource for FakeSource {
    fn fetch<'a>(&'a self, date_key: &'a str) -> BoxFuture<'a, Result<RemoteContent, SourceError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reachable = self.reachable.load(Ordering::SeqCst);
        Box::pin(async move {
            if !reachable {
                return Err(SourceError::Network("connection refused".to_string()));
            }
            Ok(RemoteContent {
                content_id: format!("daily-{}", date_key),
                payload: serde_json::json!({"title": "Daily reading", "date": date_key}),
                revision: Some("r1".to_string()),
            })
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn test_config() -> CacheConfig {
    CacheConfig::for_environment(Environment::Test)
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn scenario_a_cold_store_fetches_on_first_read() {
    let source = FakeSource::new(true);
    let coordinator = Coordinator::new(test_config(), Arc::new(MemoryStore::new()), source.clone());
    coordinator.initialize(DeviceHints::default()).await.unwrap();

    let record = coordinator.get_today_content(false).await.unwrap();
    assert!(record.content_id.starts_with("daily-"));
    assert!(!record.is_stale);
    assert!(record.fetched_at <= record.valid_until);
    assert!(record.verify());
    assert_eq!(source.calls(), 1);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn scenario_b_expired_record_while_offline() {
    let source = FakeSource::new(false);
    let coordinator = Coordinator::new(test_config(), Arc::new(MemoryStore::new()), source);
    coordinator.initialize(DeviceHints::default()).await.unwrap();
    coordinator.set_online(false);

    let now = Utc::now();
    let fetched_at = now - Duration::hours(24) - Duration::minutes(1);
    let record = ContentRecord::new(
        "yesterday",
        serde_json::json!({"title": "Old news"}),
        None,
        fetched_at,
        Duration::hours(24),
        now + Duration::days(1),
        "2000-01-01",
    );
    assert!(record.valid_until < now);
    coordinator.services().store.put(record);

    assert!(coordinator.get_today_content(false).await.is_none());

    let stale = coordinator.get_today_content(true).await.unwrap();
    assert_eq!(stale.content_id, "yesterday");
    assert!(stale.is_stale);
}

#[tokio::test]
async fn scenario_c_backoff_doubles_from_base() {
    let backoff = Backoff::new(Duration::seconds(1), Duration::seconds(30));
    let delays: Vec<i64> = (1..=3).map(|n| backoff.delay_for(n).num_seconds()).collect();
    assert_eq!(delays, vec![1, 2, 4]);
    assert_eq!(backoff.delay_for(10), Duration::seconds(30));

    // Same progression through the live sync service
    let mut config = test_config();
    config.max_sync_attempts = 10;
    let source = FakeSource::new(false);
    let coordinator = Coordinator::new(config, Arc::new(MemoryStore::new()), source);

    for expected_secs in [1, 2, 4] {
        let before = Utc::now();
        assert!(coordinator.refresh().await.is_err());
        let task = coordinator.services().sync.current_task().unwrap();
        let until = task.backoff_until.unwrap();
        let delay = until - before;
        assert!(delay >= Duration::seconds(expected_secs));
        assert!(delay < Duration::seconds(expected_secs) + Duration::milliseconds(500));
    }
    coordinator.services().sync.shutdown();
}

#[tokio::test]
async fn scenario_d_memory_pressure_selects_memory_strategy() {
    let coordinator = Coordinator::new(test_config(), Arc::new(MemoryStore::new()), FakeSource::new(true));
    for day in 1..=3 {
        let fetched_at = Utc::now() - Duration::hours(day);
        coordinator.services().store.put(ContentRecord::new(
            format!("item-{}", day),
            serde_json::json!({"day": day}),
            None,
            fetched_at,
            Duration::hours(24),
            fetched_at + Duration::hours(24),
            format!("2024-01-0{}", day),
        ));
    }

    let hints = DeviceHints {
        memory_pressure: Some(true),
        usage_pattern: Some(UsagePattern::Heavy),
        ..DeviceHints::default()
    };
    let context = coordinator.optimization_context(&hints);
    let report = coordinator.execute_optimization_strategy(OptimizationTrigger::MemoryWarning, &context);

    assert_eq!(report.strategy, OptimizationStrategyKind::MemoryOptimized);
    assert!(report.memory_freed_bytes > 0);
    assert_eq!(coordinator.services().store.history().len(), 1);
}

#[test]
fn scenario_e_spring_forward_day_is_one_content_day() {
    let resolver = TimezoneResolver::new("America/New_York");
    let early = utc("2024-03-10T05:30:00Z");
    let late = utc("2024-03-11T03:30:00Z");
    assert_eq!(resolver.content_day_key(early), "2024-03-10");
    assert_eq!(resolver.content_day_key(early), resolver.content_day_key(late));

    let record = ContentRecord::new(
        "dst",
        serde_json::json!({}),
        None,
        early,
        Duration::hours(24),
        resolver.day_boundary(early),
        resolver.content_day_key(early),
    );
    // 23 local hours in this day, so the boundary clamps the window
    assert_eq!(record.valid_until, utc("2024-03-11T04:00:00Z"));
    assert!(!record.is_expired_at(late));
}

#[tokio::test]
async fn file_backed_restart_keeps_content() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CacheConfig::for_environment(Environment::Production);
    config.sync_check_interval = Duration::hours(1);
    config.maintenance_interval = Duration::hours(1);
    config.warming_check_interval = Duration::hours(1);

    let source = FakeSource::new(true);
    {
        let backend = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
        let coordinator = Coordinator::new(config.clone(), backend.clone(), source.clone());
        coordinator.initialize(DeviceHints::default()).await.unwrap();
        // Startup sync may still be running; a cold read waits for it
        coordinator.get_today_content(false).await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert!(backend.contains_key(SHUTDOWN_MARKER_KEY).unwrap());
    }

    source.reachable.store(false, Ordering::SeqCst);
    let backend = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    let coordinator = Coordinator::new(config, backend, source);
    let report = coordinator.initialize(DeviceHints::default()).await.unwrap();
    assert_eq!(report.strategy.as_str(), "warm_restart");

    let record = coordinator.get_today_content(false).await.unwrap();
    assert!(record.content_id.starts_with("daily-"));
    coordinator.shutdown().await;
}
