//! Startup and shutdown sequencing.
//!
//! `initialize` selects an initialization strategy from the previous run's
//! markers and host hints, brings services up in dependency order, and
//! registers the periodic timers. Each timer is its own tokio task with its
//! own cancellation token, so it can be stopped on its own or with the rest
//! on `shutdown`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::as_std;
use crate::error::ConfigError;
use crate::services::Services;
use crate::storage;
use crate::strategy::init;
use crate::strategy::{
    DeviceClass, DeviceHints, InitPlan, InitStrategyKind, InitializationContext, Phase, ServiceId, UsagePattern,
};
use crate::sync::SyncTrigger;
use crate::warming::WarmingContext;

/// Written on clean shutdown; its age drives warm-restart selection.
pub const SHUTDOWN_MARKER_KEY: &str = "lifecycle.shutdown_at";

/// Written when a sync fails permanently; selects recovery on next start.
pub const ERROR_MARKER_KEY: &str = "lifecycle.error";

pub const TIMER_SYNC_CHECK: &str = "sync_check";
pub const TIMER_MAINTENANCE: &str = "maintenance";
pub const TIMER_WARMING: &str = "warming";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownMarker {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub strategy: InitStrategyKind,
    pub plan: InitPlan,
    pub context: InitializationContext,
    pub timers: Vec<&'static str>,
    pub startup_latency_ms: f64,
    pub started_at: DateTime<Utc>,
    /// Set when `initialize` found the engine already running.
    pub already_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub uptime_secs: i64,
    pub timers_cancelled: usize,
    /// Deferred services that finished starting before shutdown proceeded.
    pub deferred_started: usize,
    pub counters_flushed: bool,
}

/// A periodic background task with its own cancellation token.
struct ScheduledTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn spawn<F, Fut>(name: &'static str, period: std::time::Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = period.max(std::time::Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            // First tick one full period after registration
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            biased;

                            _ = cancelled.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
            debug!(timer = name, "Timer stopped");
        });

        Self { name, token, handle }
    }

    async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(timer = self.name, error = %e, "Timer task ended abnormally");
        }
    }
}

struct Running {
    report: InitReport,
    timers: Vec<ScheduledTask>,
    /// Background bring-up of deferred services; yields the count started.
    deferred: Option<JoinHandle<usize>>,
}

pub struct LifecycleManager {
    services: Arc<Services>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl LifecycleManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bring the engine up. Calling it again while running returns the
    /// original report with `already_running` set.
    pub async fn initialize(&self, hints: DeviceHints) -> Result<InitReport, ConfigError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            debug!("Initialize called while running");
            let mut report = current.report.clone();
            report.already_running = true;
            return Ok(report);
        }

        let started = Instant::now();
        let services = &self.services;
        services.config.validate()?;

        let now = Utc::now();
        let context = self.build_context(&hints, now);
        let strategy = init::select(&context, &services.config);
        let plan = strategy.plan();
        info!(
            strategy = strategy.as_str(),
            environment = services.config.environment.as_str(),
            "Initializing engine"
        );

        services.sync.restart();

        let mut deferred = Vec::new();
        for service in ServiceId::STARTUP_ORDER {
            match plan.phase(service) {
                Phase::Eager => bring_up(services, service),
                Phase::Deferred => deferred.push(service),
                Phase::Skipped => debug!(service = service.as_str(), "Service start skipped"),
            }
        }

        if plan.run_integrity_checks && !services.store.verify_integrity() {
            warn!("Current record failed integrity check, invalidating");
            services.store.invalidate();
        }

        if plan.wire_io {
            for key in [ERROR_MARKER_KEY, SHUTDOWN_MARKER_KEY] {
                if let Err(e) = services.backend.remove(key) {
                    warn!(key, error = %e, "Failed to clear lifecycle marker");
                }
            }
        }

        let timers = if plan.register_timers {
            self.register_timers()
        } else {
            Vec::new()
        };

        let deferred = (!deferred.is_empty()).then(|| {
            let services = Arc::clone(&self.services);
            tokio::spawn(async move {
                let count = deferred.len();
                for service in deferred {
                    tokio::task::yield_now().await;
                    bring_up(&services, service);
                }
                count
            })
        });

        if plan.startup_sync && services.sync.needs_sync(now) {
            services.sync.trigger(SyncTrigger::Startup);
        }

        let report = InitReport {
            strategy,
            plan,
            context,
            timers: timers.iter().map(|t| t.name).collect(),
            startup_latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            started_at: now,
            already_running: false,
        };
        info!(
            strategy = strategy.as_str(),
            latency_ms = report.startup_latency_ms,
            timers = report.timers.len(),
            "Engine initialized"
        );
        *running = Some(Running {
            report: report.clone(),
            timers,
            deferred,
        });
        Ok(report)
    }

    /// Wait out deferred bring-up, stop timers (newest first), abandon any
    /// in-flight sync, and persist counters and the clean-shutdown marker.
    /// A no-op when not running.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        let state = self.running.lock().await.take()?;
        let services = &self.services;

        // Bring-up writes to the store, so it must finish before the marker
        let deferred_started = match state.deferred {
            Some(handle) => match handle.await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Deferred bring-up ended abnormally");
                    0
                }
            },
            None => 0,
        };

        let timers_cancelled = state.timers.len();
        for timer in state.timers.into_iter().rev() {
            debug!(timer = timer.name, "Cancelling timer");
            timer.cancel().await;
        }
        services.sync.shutdown();

        let mut counters_flushed = false;
        if state.report.plan.wire_io {
            match services.stats.flush(services.backend.as_ref()) {
                Ok(()) => counters_flushed = true,
                Err(e) => warn!(error = %e, "Failed to flush counters"),
            }
            let marker = ShutdownMarker { at: Utc::now() };
            if let Err(e) = storage::save_json(services.backend.as_ref(), SHUTDOWN_MARKER_KEY, &marker) {
                warn!(error = %e, "Failed to write shutdown marker");
            }
        }

        let uptime_secs = (Utc::now() - state.report.started_at).num_seconds();
        info!(uptime_secs, timers_cancelled, "Engine shut down");
        Some(ShutdownReport {
            uptime_secs,
            timers_cancelled,
            deferred_started,
            counters_flushed,
        })
    }

    /// Stop one timer by name. Returns false if it was not registered.
    pub async fn cancel_timer(&self, name: &str) -> bool {
        let timer = {
            let mut running = self.running.lock().await;
            let Some(state) = running.as_mut() else {
                return false;
            };
            match state.timers.iter().position(|t| t.name == name) {
                Some(index) => state.timers.remove(index),
                None => return false,
            }
        };
        timer.cancel().await;
        info!(timer = name, "Timer cancelled");
        true
    }

    pub async fn active_timers(&self) -> Vec<&'static str> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|state| state.timers.iter().map(|t| t.name).collect())
            .unwrap_or_default()
    }

    fn build_context(&self, hints: &DeviceHints, now: DateTime<Utc>) -> InitializationContext {
        let services = &self.services;
        let backend = services.backend.as_ref();

        let error_marker = match backend.contains_key(ERROR_MARKER_KEY) {
            Ok(present) => present,
            Err(e) => {
                warn!(error = %e, "Failed to read error marker");
                false
            }
        };
        let since_last_shutdown = match storage::load_json::<ShutdownMarker>(backend, SHUTDOWN_MARKER_KEY) {
            Ok(marker) => marker.map(|m| now - m.at),
            Err(e) => {
                warn!(error = %e, "Failed to read shutdown marker");
                None
            }
        };

        InitializationContext {
            device_class: hints.device_class.unwrap_or(DeviceClass::MidRange),
            memory_pressure: hints
                .memory_pressure
                .unwrap_or_else(|| services.resident_mb() >= services.config.memory_warning_mb as f64),
            performance_issue: services.performance.analyze().has_issue(),
            usage_pattern: hints
                .usage_pattern
                .unwrap_or_else(|| UsagePattern::from_interactions(services.stats.total_interactions())),
            environment: services.config.environment,
            error_marker,
            since_last_shutdown,
            background_launch: hints.background_launch,
        }
    }

    fn register_timers(&self) -> Vec<ScheduledTask> {
        let config = &self.services.config;

        let sync = Arc::clone(&self.services.sync);
        let sync_check = ScheduledTask::spawn(TIMER_SYNC_CHECK, as_std(config.sync_check_interval), move || {
            let sync = Arc::clone(&sync);
            async move {
                if sync.needs_sync(Utc::now()) {
                    sync.trigger(SyncTrigger::Periodic);
                }
            }
        });

        let maintenance = Arc::clone(&self.services.maintenance);
        let sweep = ScheduledTask::spawn(TIMER_MAINTENANCE, as_std(config.maintenance_interval), move || {
            let maintenance = Arc::clone(&maintenance);
            async move {
                maintenance.sweep();
            }
        });

        let warming = Arc::clone(&self.services.warming);
        let warm = ScheduledTask::spawn(TIMER_WARMING, as_std(config.warming_check_interval), move || {
            let warming = Arc::clone(&warming);
            async move {
                warming.warm(WarmingContext::now()).await;
            }
        });

        vec![sync_check, sweep, warm]
    }
}

/// Start-up work for one service.
fn bring_up(services: &Services, service: ServiceId) {
    match service {
        ServiceId::ContentStore => services.store.load(),
        ServiceId::Timezone => {
            let status = services.timezone.status();
            debug!(resolved = %status.resolved, fell_back = status.fell_back_to_utc, "Timezone ready");
        }
        ServiceId::Sync => {
            debug!(online = services.sync.is_online(), "Sync ready");
        }
        ServiceId::Maintenance => {
            services.maintenance.sweep();
        }
        ServiceId::Health => {
            services.health.record_snapshot();
        }
        ServiceId::Statistics => {
            match crate::stats::StatisticsCollector::load_persisted(services.backend.as_ref()) {
                Ok(Some(previous)) => debug!(
                    saved_at = %previous.saved_at,
                    reads = previous.statistics.reads,
                    "Previous run counters found"
                ),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read previous counters"),
            }
        }
        ServiceId::Performance => {
            services.performance.analyze();
        }
        ServiceId::Warming => services.warming.load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Environment};
    use crate::source::scripted::ScriptedSource;
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::Duration;

    fn services(environment: Environment, backend: Arc<MemoryStore>) -> Arc<Services> {
        let mut config = CacheConfig::for_environment(environment);
        // Keep timers and startup sync quiet in production-mode tests
        config.sync_check_interval = Duration::hours(1);
        config.maintenance_interval = Duration::hours(1);
        config.warming_check_interval = Duration::hours(1);
        Arc::new(Services::new(config, backend, Arc::new(ScriptedSource::ok("boot"))))
    }

    #[tokio::test]
    async fn test_initialize_is_reentrant() {
        let lifecycle = LifecycleManager::new(services(Environment::Test, Arc::new(MemoryStore::new())));
        let first = lifecycle.initialize(DeviceHints::default()).await.unwrap();
        assert_eq!(first.strategy, InitStrategyKind::Test);
        assert!(!first.already_running);

        let second = lifecycle.initialize(DeviceHints::default()).await.unwrap();
        assert!(second.already_running);
        assert_eq!(second.started_at, first.started_at);
    }

    #[tokio::test]
    async fn test_shutdown_when_not_running_is_noop() {
        let lifecycle = LifecycleManager::new(services(Environment::Test, Arc::new(MemoryStore::new())));
        assert!(lifecycle.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.backoff_base = Duration::minutes(10);
        config.backoff_cap = Duration::seconds(1);
        let services = Arc::new(Services::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedSource::ok("x")),
        ));
        let lifecycle = LifecycleManager::new(services);
        assert!(lifecycle.initialize(DeviceHints::default()).await.is_err());
        assert!(!lifecycle.is_running().await);
    }

    #[tokio::test]
    async fn test_cold_start_registers_timers_and_marks_shutdown() {
        let backend = Arc::new(MemoryStore::new());
        let lifecycle = LifecycleManager::new(services(Environment::Production, backend.clone()));

        let report = lifecycle.initialize(DeviceHints::default()).await.unwrap();
        assert_eq!(report.strategy, InitStrategyKind::ColdStart);
        assert_eq!(report.timers, vec![TIMER_SYNC_CHECK, TIMER_MAINTENANCE, TIMER_WARMING]);

        assert!(lifecycle.cancel_timer(TIMER_WARMING).await);
        assert!(!lifecycle.cancel_timer(TIMER_WARMING).await);
        assert_eq!(lifecycle.active_timers().await.len(), 2);

        let shutdown = lifecycle.shutdown().await.unwrap();
        assert_eq!(shutdown.timers_cancelled, 2);
        assert_eq!(shutdown.deferred_started, 4);
        assert!(shutdown.counters_flushed);
        assert!(backend.contains_key(SHUTDOWN_MARKER_KEY).unwrap());

        // Quick restart picks the warm path
        let again = lifecycle.initialize(DeviceHints::default()).await.unwrap();
        assert_eq!(again.strategy, InitStrategyKind::WarmRestart);
        assert!(!backend.contains_key(SHUTDOWN_MARKER_KEY).unwrap());
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_joins_deferred_bring_up() {
        let backend = Arc::new(MemoryStore::new());
        let lifecycle = LifecycleManager::new(services(Environment::Production, backend.clone()));
        lifecycle.initialize(DeviceHints::default()).await.unwrap();

        // Shut down before the deferred task has had a chance to run
        let report = lifecycle.shutdown().await.unwrap();
        assert_eq!(report.deferred_started, 4);
        assert_eq!(lifecycle.services.maintenance.status().sweeps, 1);
        assert!(!lifecycle.services.health.history().is_empty());
        assert!(backend.contains_key(SHUTDOWN_MARKER_KEY).unwrap());
    }

    #[tokio::test]
    async fn test_test_strategy_defers_nothing() {
        let lifecycle = LifecycleManager::new(services(Environment::Test, Arc::new(MemoryStore::new())));
        lifecycle.initialize(DeviceHints::default()).await.unwrap();
        let report = lifecycle.shutdown().await.unwrap();
        assert_eq!(report.deferred_started, 0);
        assert!(!report.counters_flushed);
    }

    #[tokio::test]
    async fn test_error_marker_selects_recovery() {
        let backend = Arc::new(MemoryStore::new());
        let marker = ErrorMarker {
            at: Utc::now(),
            reason: "Unauthorized".to_string(),
        };
        storage::save_json(backend.as_ref(), ERROR_MARKER_KEY, &marker).unwrap();

        let lifecycle = LifecycleManager::new(services(Environment::Production, backend.clone()));
        let report = lifecycle.initialize(DeviceHints::default()).await.unwrap();
        assert_eq!(report.strategy, InitStrategyKind::Recovery);
        assert!(report.context.error_marker);
        assert!(!backend.contains_key(ERROR_MARKER_KEY).unwrap());
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_timer_ticks_until_cancelled() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let timer = ScheduledTask::spawn("test", std::time::Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(55)).await;
        timer.cancel().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
