use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::{Backoff, SyncState, SyncTask, SyncTrigger, TASK_KEY};
use crate::config::{as_std, CacheConfig};
use crate::content::{ContentRecord, ContentStore, Freshness};
use crate::error::{SourceError, SyncError};
use crate::health::HealthMonitor;
use crate::lifecycle::{ErrorMarker, ERROR_MARKER_KEY};
use crate::source::ContentSource;
use crate::stats::StatisticsCollector;
use crate::storage::{self, KeyValueStore};
use crate::timezone::TimezoneResolver;

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    #[serde(flatten)]
    pub state: SyncState,
    pub online: bool,
    pub task: Option<SyncTask>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub fetch_timeout_ms: u64,
    pub max_attempts: u32,
    pub source: &'static str,
}

/// Result of a single fetch attempt within a task.
enum AttemptOutcome {
    Succeeded(ContentRecord),
    /// `retry_token` is already installed as the task's retry-loop owner.
    Retry {
        delay: Duration,
        error: SourceError,
        retry_token: CancellationToken,
    },
    Failed(SourceError),
    Cancelled,
}

#[derive(Debug)]
struct SyncInner {
    state: SyncState,
    task: Option<SyncTask>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Token of the background loop sleeping out the current backoff.
    retry_loop: Option<CancellationToken>,
}

/// Background synchronization of the daily record.
///
/// At most one task is in flight. A transient failure moves the task into
/// backoff and a background loop retries it; a permanent failure (or an
/// exhausted attempt budget) ends the task, writes the lifecycle error
/// marker and leaves the last record in place for stale reads.
pub struct ConnectivitySync {
    store: Arc<ContentStore>,
    timezone: Arc<TimezoneResolver>,
    source: Arc<dyn ContentSource>,
    stats: Arc<StatisticsCollector>,
    health: Arc<HealthMonitor>,
    backoff: Backoff,
    freshness_window: Duration,
    default_timeout: std::time::Duration,
    default_attempts: u32,
    fetch_timeout: Mutex<std::time::Duration>,
    max_attempts: AtomicU32,
    online: AtomicBool,
    inner: Mutex<SyncInner>,
    /// Notified whenever an attempt finishes or a task is abandoned.
    settled: Notify,
    shutdown: Mutex<CancellationToken>,
}

impl ConnectivitySync {
    pub fn new(
        store: Arc<ContentStore>,
        timezone: Arc<TimezoneResolver>,
        source: Arc<dyn ContentSource>,
        stats: Arc<StatisticsCollector>,
        health: Arc<HealthMonitor>,
        config: &CacheConfig,
    ) -> Self {
        let default_timeout = as_std(config.sync_timeout);
        Self {
            store,
            timezone,
            source,
            stats,
            health,
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            freshness_window: config.freshness_window,
            default_timeout,
            default_attempts: config.max_sync_attempts,
            fetch_timeout: Mutex::new(default_timeout),
            max_attempts: AtomicU32::new(config.max_sync_attempts),
            online: AtomicBool::new(true),
            inner: Mutex::new(SyncInner {
                state: SyncState::Idle,
                task: None,
                last_success_at: None,
                last_error: None,
                retry_loop: None,
            }),
            settled: Notify::new(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    // ===== Triggers =====

    /// Run one bounded attempt and wait for it. A transient failure leaves
    /// the task backing off with a background loop retrying it.
    pub async fn refresh_once(self: &Arc<Self>, trigger: SyncTrigger) -> Result<ContentRecord, SyncError> {
        let mut task = self.begin(trigger)?;
        match self.attempt(&mut task).await {
            AttemptOutcome::Succeeded(record) => Ok(record),
            AttemptOutcome::Retry {
                delay,
                error,
                retry_token,
            } => {
                self.spawn_retry_loop(task, delay, retry_token);
                Err(SyncError::Source(error))
            }
            AttemptOutcome::Failed(error) => Err(SyncError::Source(error)),
            AttemptOutcome::Cancelled => Err(SyncError::Cancelled),
        }
    }

    /// Start a background task. Returns false when one is already running
    /// or backing off.
    pub fn trigger(self: &Arc<Self>, trigger: SyncTrigger) -> bool {
        let task = match self.begin(trigger) {
            Ok(task) => task,
            Err(e) => {
                debug!(trigger = trigger.as_str(), reason = %e, "Sync trigger ignored");
                return false;
            }
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut task = task;
            if let AttemptOutcome::Retry {
                delay, retry_token, ..
            } = this.attempt(&mut task).await
            {
                this.spawn_retry_loop(task, delay, retry_token);
            }
        });
        true
    }

    /// Track connectivity. Coming back online triggers a sync.
    pub fn set_online(self: &Arc<Self>, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        info!(online, "Connectivity changed");
        if online && !was_online {
            return self.trigger(SyncTrigger::ConnectivityRestored);
        }
        false
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Whether the current record is missing, stale, or from an earlier content day.
    pub fn needs_sync(&self, now: DateTime<Utc>) -> bool {
        if self.store.freshness_at(now) != Freshness::Fresh {
            return true;
        }
        let today = self.timezone.content_day_key(now);
        self.store.peek().is_some_and(|r| r.content_day != today)
    }

    // ===== State machine =====

    fn begin(&self, trigger: SyncTrigger) -> Result<SyncTask, SyncError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SyncState::Syncing => return Err(SyncError::InFlight),
            SyncState::Backoff { until } if !trigger.bypasses_backoff() => {
                return Err(SyncError::BackingOff(until))
            }
            _ => {}
        }

        // A foreground trigger takes the task over from the sleeping loop.
        if let Some(token) = inner.retry_loop.take() {
            token.cancel();
        }
        let mut task = inner
            .task
            .take()
            .unwrap_or_else(|| SyncTask::new(trigger, Utc::now()));
        task.attempt += 1;
        task.backoff_until = None;
        inner.state = SyncState::Syncing;
        inner.task = Some(task.clone());
        Ok(task)
    }

    async fn attempt(&self, task: &mut SyncTask) -> AttemptOutcome {
        self.persist_task(task);
        self.stats.record_sync_attempt();
        let started = Instant::now();
        let date_key = self.timezone.content_day_key(Utc::now());
        let shutdown = self.shutdown.lock().clone();

        debug!(
            task_id = %task.task_id,
            attempt = task.attempt,
            trigger = task.trigger.as_str(),
            date = %date_key,
            "Sync attempt"
        );

        let result = if !self.is_online() {
            Err(SourceError::Offline)
        } else {
            let timeout = *self.fetch_timeout.lock();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.abandon();
                    return AttemptOutcome::Cancelled;
                }
                fetched = tokio::time::timeout(timeout, self.source.fetch(&date_key)) => {
                    fetched.unwrap_or_else(|_| Err(SourceError::Timeout(timeout.as_millis() as u64)))
                }
            }
        };

        let outcome = match result {
            Ok(remote) => {
                let fetched_at = Utc::now();
                let record = ContentRecord::new(
                    remote.content_id,
                    remote.payload,
                    remote.revision,
                    fetched_at,
                    self.freshness_window,
                    self.timezone.day_boundary(fetched_at),
                    self.timezone.content_day_key(fetched_at),
                );
                self.store.put(record.clone());
                self.stats.record_sync_success(started.elapsed());
                self.health.record_sync_outcome(true);
                {
                    let mut inner = self.inner.lock();
                    inner.state = SyncState::Idle;
                    inner.task = None;
                    inner.last_success_at = Some(fetched_at);
                    inner.last_error = None;
                }
                self.clear_persisted_task();
                info!(
                    content_id = %record.content_id,
                    attempt = task.attempt,
                    "Sync succeeded"
                );
                AttemptOutcome::Succeeded(record)
            }
            Err(error) => self.fail(task, error),
        };
        self.settled.notify_waiters();
        outcome
    }

    /// Wait until no attempt is running, up to `timeout`. Returns whether
    /// the engine settled in time.
    pub async fn wait_settled(&self, timeout: std::time::Duration) -> bool {
        let notified = self.settled.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.state() != SyncState::Syncing {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    fn fail(&self, task: &mut SyncTask, error: SourceError) -> AttemptOutcome {
        self.health.record_sync_outcome(false);
        let now = Utc::now();
        let max_attempts = self.max_attempts();
        let permanent = !error.is_transient() || task.attempt >= max_attempts;
        self.stats.record_sync_failure(permanent);
        task.last_error = Some(error.to_string());

        if permanent {
            {
                let mut inner = self.inner.lock();
                inner.state = SyncState::Idle;
                inner.task = None;
                inner.last_error = Some(error.to_string());
            }
            self.clear_persisted_task();
            let marker = ErrorMarker {
                at: now,
                reason: error.to_string(),
            };
            if let Err(e) = storage::save_json(self.backend(), ERROR_MARKER_KEY, &marker) {
                warn!(error = %e, "Failed to write sync error marker");
            }
            warn!(
                task_id = %task.task_id,
                attempt = task.attempt,
                error = %error,
                "Sync failed permanently, serving last record"
            );
            return AttemptOutcome::Failed(error);
        }

        let delay = self.backoff.delay_for(task.attempt);
        let until = now + delay;
        task.backoff_until = Some(until);
        let retry_token = self.shutdown.lock().child_token();
        {
            // Backoff and its loop owner become visible together
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.retry_loop.replace(retry_token.clone()) {
                previous.cancel();
            }
            inner.state = SyncState::Backoff { until };
            inner.task = Some(task.clone());
            inner.last_error = Some(error.to_string());
        }
        self.persist_task(task);
        warn!(
            task_id = %task.task_id,
            attempt = task.attempt,
            max_attempts,
            delay_ms = delay.num_milliseconds(),
            error = %error,
            "Sync failed, backing off"
        );
        AttemptOutcome::Retry {
            delay,
            error,
            retry_token,
        }
    }

    fn spawn_retry_loop(self: &Arc<Self>, task: SyncTask, delay: Duration, retry_token: CancellationToken) {
        let shutdown = self.shutdown.lock().clone();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut task_id = task.task_id;
            let mut delay = delay;
            let mut retry_token = retry_token;
            loop {
                tokio::select! {
                    _ = retry_token.cancelled() => {
                        if shutdown.is_cancelled() {
                            this.abandon();
                        }
                        // Otherwise a foreground trigger took the task over
                        return;
                    }
                    _ = tokio::time::sleep(as_std(delay)) => {}
                }

                let mut task = match this.resume(&task_id, &retry_token) {
                    Some(task) => task,
                    None => return,
                };
                task_id = task.task_id.clone();
                match this.attempt(&mut task).await {
                    AttemptOutcome::Retry {
                        delay: next,
                        retry_token: next_token,
                        ..
                    } => {
                        delay = next;
                        retry_token = next_token;
                    }
                    _ => return,
                }
            }
        });
    }

    /// Move a backing-off task back to `Syncing` if this loop still owns it.
    fn resume(&self, task_id: &str, retry_token: &CancellationToken) -> Option<SyncTask> {
        let mut inner = self.inner.lock();
        if retry_token.is_cancelled() || !matches!(inner.state, SyncState::Backoff { .. }) {
            return None;
        }
        let task = inner.task.as_mut().filter(|t| t.task_id == task_id)?;
        task.attempt += 1;
        task.backoff_until = None;
        let task = task.clone();
        inner.state = SyncState::Syncing;
        Some(task)
    }

    /// Drop the in-flight task without writing anything to the store.
    pub fn abandon(&self) {
        let abandoned = {
            let mut inner = self.inner.lock();
            if let Some(token) = inner.retry_loop.take() {
                token.cancel();
            }
            inner.state = SyncState::Idle;
            inner.task.take()
        };
        self.settled.notify_waiters();
        if let Some(task) = abandoned {
            self.clear_persisted_task();
            info!(task_id = %task.task_id, attempt = task.attempt, "Sync task abandoned");
        }
    }

    /// Cancel background work for shutdown.
    pub fn shutdown(&self) {
        self.shutdown.lock().cancel();
        self.abandon();
    }

    /// Install a fresh cancellation token after a shutdown.
    pub fn restart(&self) {
        let mut token = self.shutdown.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    // ===== Tuning =====

    pub fn fetch_timeout(&self) -> std::time::Duration {
        *self.fetch_timeout.lock()
    }

    pub fn set_fetch_timeout(&self, timeout: std::time::Duration) {
        *self.fetch_timeout.lock() = timeout.max(std::time::Duration::from_millis(1));
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.load(Ordering::SeqCst)
    }

    pub fn set_max_attempts(&self, attempts: u32) {
        self.max_attempts.store(attempts.max(1), Ordering::SeqCst);
    }

    pub fn default_fetch_timeout(&self) -> std::time::Duration {
        self.default_timeout
    }

    pub fn default_max_attempts(&self) -> u32 {
        self.default_attempts
    }

    /// Restore configured timeout and attempt budget.
    pub fn reset_tuning(&self) {
        self.set_fetch_timeout(self.default_timeout);
        self.set_max_attempts(self.default_attempts);
    }

    // ===== Status =====

    pub fn state(&self) -> SyncState {
        self.inner.lock().state
    }

    /// A task is syncing or waiting out a backoff.
    pub fn is_busy(&self) -> bool {
        !matches!(self.inner.lock().state, SyncState::Idle)
    }

    pub fn current_task(&self) -> Option<SyncTask> {
        self.inner.lock().task.clone()
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.inner.lock();
        SyncStatus {
            state: inner.state,
            online: self.is_online(),
            task: inner.task.clone(),
            last_success_at: inner.last_success_at,
            last_error: inner.last_error.clone(),
            fetch_timeout_ms: self.fetch_timeout().as_millis() as u64,
            max_attempts: self.max_attempts(),
            source: self.source.name(),
        }
    }

    // ===== Persistence =====

    fn backend(&self) -> &dyn KeyValueStore {
        self.store.backend().as_ref()
    }

    fn persist_task(&self, task: &SyncTask) {
        if let Err(e) = storage::save_json(self.backend(), TASK_KEY, task) {
            warn!(error = %e, "Failed to mirror sync task");
        }
    }

    fn clear_persisted_task(&self) {
        if let Err(e) = self.backend().remove(TASK_KEY) {
            warn!(error = %e, "Failed to clear sync task");
        }
    }
}

/// Task left in storage by an earlier process, if any.
pub fn load_persisted_task(store: &dyn KeyValueStore) -> Option<SyncTask> {
    match storage::load_json::<SyncTask>(store, TASK_KEY) {
        Ok(task) => task,
        Err(e) => {
            warn!(error = %e, "Unreadable persisted sync task");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::source::scripted::{content, ScriptedSource};
    use crate::stats::PerformanceMonitor;
    use crate::storage::MemoryStore;

    struct Harness {
        backend: Arc<MemoryStore>,
        store: Arc<ContentStore>,
        stats: Arc<StatisticsCollector>,
        health: Arc<HealthMonitor>,
        source: Arc<ScriptedSource>,
        sync: Arc<ConnectivitySync>,
    }

    fn harness(source: ScriptedSource, config: CacheConfig) -> Harness {
        let backend = Arc::new(MemoryStore::new());
        let stats = Arc::new(StatisticsCollector::new(config.timing_sample_capacity));
        let store = Arc::new(ContentStore::new(
            backend.clone(),
            Arc::clone(&stats),
            config.history_limit,
        ));
        let timezone = Arc::new(TimezoneResolver::new(&config.timezone));
        let performance = Arc::new(PerformanceMonitor::new(Arc::clone(&stats), &config));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            performance,
            Arc::clone(&timezone),
            &config,
        ));
        let source = Arc::new(source);
        let sync = Arc::new(ConnectivitySync::new(
            Arc::clone(&store),
            timezone,
            source.clone(),
            Arc::clone(&stats),
            Arc::clone(&health),
            &config,
        ));
        Harness {
            backend,
            store,
            stats,
            health,
            source,
            sync,
        }
    }

    fn fast_config() -> CacheConfig {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.backoff_base = Duration::milliseconds(10);
        config.backoff_cap = Duration::milliseconds(40);
        config
    }

    #[tokio::test]
    async fn test_refresh_success_stores_record() {
        let h = harness(ScriptedSource::ok("today"), fast_config());
        let record = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.unwrap();

        assert_eq!(record.content_id, "today");
        assert!(record.fetched_at <= record.valid_until);
        assert_eq!(h.store.peek().unwrap().content_id, "today");
        assert_eq!(h.sync.state(), SyncState::Idle);
        assert!(!h.backend.contains_key(TASK_KEY).unwrap());
        assert_eq!(h.stats.snapshot().sync_successes, 1);
        assert_eq!(h.health.sync_success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_transient_failure_enters_backoff() {
        let mut config = fast_config();
        config.backoff_base = Duration::seconds(1);
        config.backoff_cap = Duration::seconds(30);
        let h = harness(ScriptedSource::failing(SourceError::Offline), config);

        let before = Utc::now();
        let err = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.unwrap_err();
        assert_eq!(err, SyncError::Source(SourceError::Offline));

        match h.sync.state() {
            SyncState::Backoff { until } => {
                assert!(until >= before + Duration::seconds(1));
                assert!(until <= Utc::now() + Duration::seconds(1));
            }
            other => panic!("expected backoff, got {other:?}"),
        }
        let persisted = load_persisted_task(h.backend.as_ref()).unwrap();
        assert_eq!(persisted.attempt, 1);
        assert!(persisted.backoff_until.is_some());

        // Background triggers respect the backoff window.
        assert!(!h.sync.trigger(SyncTrigger::Periodic));
        h.sync.shutdown();
    }

    #[tokio::test]
    async fn test_permanent_failure_writes_error_marker() {
        let h = harness(ScriptedSource::failing(SourceError::Unauthorized), fast_config());
        let err = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.unwrap_err();

        assert_eq!(err, SyncError::Source(SourceError::Unauthorized));
        assert_eq!(h.sync.state(), SyncState::Idle);
        assert!(h.backend.contains_key(ERROR_MARKER_KEY).unwrap());
        assert!(!h.backend.contains_key(TASK_KEY).unwrap());
        assert_eq!(h.stats.snapshot().sync_permanent_failures, 1);
    }

    #[tokio::test]
    async fn test_retry_loop_exhausts_attempt_budget() {
        let h = harness(
            ScriptedSource::failing(SourceError::ServerError("down".into())),
            fast_config(),
        );
        assert!(h.sync.trigger(SyncTrigger::Periodic));
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        // Test config allows 3 attempts: 1 initial + 2 retries
        assert_eq!(h.source.calls(), 3);
        assert_eq!(h.sync.state(), SyncState::Idle);
        let snapshot = h.stats.snapshot();
        assert_eq!(snapshot.sync_transient_failures, 2);
        assert_eq!(snapshot.sync_permanent_failures, 1);
        assert!(h.backend.contains_key(ERROR_MARKER_KEY).unwrap());
    }

    #[tokio::test]
    async fn test_retry_recovers_and_resets() {
        let source = ScriptedSource::ok("later");
        source.push(Err(SourceError::Network("reset".into())));
        let h = harness(source, fast_config());

        assert!(h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(h.store.peek().unwrap().content_id, "later");
        assert_eq!(h.sync.state(), SyncState::Idle);
        assert!(h.sync.current_task().is_none());
        assert!(h.sync.status().last_error.is_none());
    }

    #[tokio::test]
    async fn test_backoff_installs_single_loop_owner() {
        let h = harness(ScriptedSource::ok("x"), fast_config());
        let mut task = h.sync.begin(SyncTrigger::Periodic).unwrap();

        let first = match h.sync.fail(&mut task, SourceError::Offline) {
            AttemptOutcome::Retry { retry_token, .. } => retry_token,
            _ => panic!("expected retry"),
        };
        assert!(matches!(h.sync.state(), SyncState::Backoff { .. }));
        assert!(h.sync.inner.lock().retry_loop.is_some());
        assert!(!first.is_cancelled());

        task.attempt += 1;
        let second = match h.sync.fail(&mut task, SourceError::Offline) {
            AttemptOutcome::Retry { retry_token, .. } => retry_token,
            _ => panic!("expected retry"),
        };
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // A bypassing trigger takes the task over from the current owner
        h.sync.begin(SyncTrigger::ExplicitRefresh).unwrap();
        assert!(second.is_cancelled());
        assert!(h.sync.inner.lock().retry_loop.is_none());
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_transient() {
        let h = harness(ScriptedSource::ok("slow"), fast_config());
        h.source.set_delay(std::time::Duration::from_millis(200));
        h.sync.set_fetch_timeout(std::time::Duration::from_millis(20));

        let err = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.unwrap_err();
        assert!(matches!(err, SyncError::Source(SourceError::Timeout(20))));
        assert!(matches!(h.sync.state(), SyncState::Backoff { .. }));
        h.sync.shutdown();
    }

    #[tokio::test]
    async fn test_offline_skips_source() {
        let h = harness(ScriptedSource::ok("x"), fast_config());
        h.sync.set_online(false);
        let err = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.unwrap_err();
        assert_eq!(err, SyncError::Source(SourceError::Offline));
        assert_eq!(h.source.calls(), 0);
        h.sync.shutdown();
    }

    #[tokio::test]
    async fn test_reconnect_triggers_sync() {
        let h = harness(ScriptedSource::ok("back"), fast_config());
        assert!(!h.sync.set_online(false));
        assert!(h.sync.set_online(true));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.store.peek().unwrap().content_id, "back");
    }

    #[tokio::test]
    async fn test_shutdown_abandons_backoff_without_writing() {
        let mut config = fast_config();
        config.backoff_base = Duration::seconds(1);
        let h = harness(ScriptedSource::failing(SourceError::Offline), config);
        let _ = h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await;
        h.source.set_fallback(Ok(content("too-late")));

        h.sync.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(h.sync.state(), SyncState::Idle);
        assert!(h.store.peek().is_none());
        assert!(!h.backend.contains_key(TASK_KEY).unwrap());

        h.sync.restart();
        assert!(h.sync.refresh_once(SyncTrigger::ExplicitRefresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_needs_sync() {
        let h = harness(ScriptedSource::ok("x"), fast_config());
        assert!(h.sync.needs_sync(Utc::now()));
        h.sync.refresh_once(SyncTrigger::Startup).await.unwrap();
        assert!(!h.sync.needs_sync(Utc::now()));
        assert!(h.sync.needs_sync(Utc::now() + Duration::days(2)));
    }

    #[tokio::test]
    async fn test_wait_settled_follows_in_flight_attempt() {
        let h = harness(ScriptedSource::ok("slow"), fast_config());
        h.source.set_delay(std::time::Duration::from_millis(50));
        assert!(h.sync.trigger(SyncTrigger::Startup));
        assert_eq!(
            h.sync.refresh_once(SyncTrigger::ColdMiss).await.unwrap_err(),
            SyncError::InFlight
        );
        assert!(h.sync.wait_settled(std::time::Duration::from_secs(1)).await);
        assert_eq!(h.store.peek().unwrap().content_id, "slow");
    }

    #[test]
    fn test_tuning_reset() {
        let h = harness(ScriptedSource::ok("x"), fast_config());
        h.sync.set_max_attempts(0);
        assert_eq!(h.sync.max_attempts(), 1);
        h.sync.set_fetch_timeout(std::time::Duration::from_millis(500));
        h.sync.reset_tuning();
        assert_eq!(h.sync.max_attempts(), 3);
        assert_eq!(h.sync.fetch_timeout(), std::time::Duration::from_secs(2));
    }
}
