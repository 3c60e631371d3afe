//! Public entry point of the engine.
//!
//! The coordinator owns the service graph and delegates every call; it keeps
//! no state of its own.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::content::ContentRecord;
use crate::error::{ConfigError, StorageError, SyncError};
use crate::health::HealthSnapshot;
use crate::lifecycle::{InitReport, LifecycleManager, ShutdownReport};
use crate::maintenance::SweepReport;
use crate::metrics::{MetricsAggregator, MetricsReport};
use crate::services::Services;
use crate::source::ContentSource;
use crate::stats::{BenchmarkReport, InteractionKind};
use crate::storage::KeyValueStore;
use crate::strategy::optimize;
use crate::strategy::{
    DeviceClass, DeviceHints, OptimizationContext, OptimizationReport, OptimizationTrigger, UsagePattern,
};
use crate::sync::SyncTrigger;

pub struct Coordinator {
    services: Arc<Services>,
    lifecycle: LifecycleManager,
    metrics: MetricsAggregator,
}

impl Coordinator {
    pub fn new(config: CacheConfig, backend: Arc<dyn KeyValueStore>, source: Arc<dyn ContentSource>) -> Self {
        let services = Arc::new(Services::new(config, backend, source));
        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&services)),
            metrics: MetricsAggregator::new(Arc::clone(&services)),
            services,
        }
    }

    pub async fn initialize(&self, hints: DeviceHints) -> Result<InitReport, ConfigError> {
        self.lifecycle.initialize(hints).await
    }

    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        self.lifecycle.shutdown().await
    }

    /// Today's content.
    ///
    /// Reads are served from the store. Only an empty store waits on the
    /// network, for one attempt bounded by the fetch timeout. A stale or
    /// out-of-day record schedules a background sync; with
    /// `allow_stale == false` an expired record is withheld.
    pub async fn get_today_content(&self, allow_stale: bool) -> Option<ContentRecord> {
        let now = Utc::now();
        let services = &self.services;
        services.warming.record_access(now);

        if !services.store.has_content() {
            self.fill_cold_store().await;
            return services.store.get(allow_stale);
        }

        let record = services.store.get_at(allow_stale, now);
        if services.sync.needs_sync(now) && services.sync.trigger(SyncTrigger::StaleRead) {
            debug!(served = record.is_some(), "Stale read scheduled a background sync");
        }
        record
    }

    async fn fill_cold_store(&self) {
        let sync = &self.services.sync;
        match sync.refresh_once(SyncTrigger::ColdMiss).await {
            Ok(record) => debug!(content_id = %record.content_id, "Cold store filled"),
            Err(SyncError::InFlight) => {
                if !sync.wait_settled(sync.fetch_timeout()).await {
                    debug!("Gave up waiting on in-flight sync");
                }
            }
            Err(e) => warn!(error = %e, "Cold fetch failed"),
        }
    }

    /// One foreground sync attempt. A transient failure keeps retrying in
    /// the background.
    pub async fn refresh(&self) -> Result<ContentRecord, SyncError> {
        info!("Explicit refresh requested");
        self.services.sync.refresh_once(SyncTrigger::ExplicitRefresh).await
    }

    pub fn record_interaction(&self, kind: InteractionKind) {
        self.services.stats.record_interaction(kind);
    }

    pub async fn get_all_statistics(&self) -> MetricsReport {
        self.metrics.get_all_statistics().await
    }

    pub async fn get_all_health_metrics(&self) -> MetricsReport {
        self.metrics.get_all_health_metrics().await
    }

    pub async fn get_performance_analytics(&self) -> MetricsReport {
        self.metrics.get_performance_analytics().await
    }

    /// Current optimization context. Hints override what the engine derives.
    pub fn optimization_context(&self, hints: &DeviceHints) -> OptimizationContext {
        let services = &self.services;
        OptimizationContext {
            device_class: hints.device_class.unwrap_or(DeviceClass::MidRange),
            memory_pressure: hints
                .memory_pressure
                .unwrap_or_else(|| services.resident_mb() >= services.config.memory_warning_mb as f64),
            performance_issue: services.performance.analyze().has_issue(),
            usage_pattern: hints
                .usage_pattern
                .unwrap_or_else(|| UsagePattern::from_interactions(services.stats.total_interactions())),
            environment: services.config.environment,
        }
    }

    pub fn execute_optimization_strategy(
        &self,
        trigger: OptimizationTrigger,
        context: &OptimizationContext,
    ) -> OptimizationReport {
        let strategy = optimize::select(context);
        debug!(trigger = ?trigger, strategy = strategy.as_str(), "Optimization strategy selected");
        strategy.execute(trigger, &self.services.optimization_targets())
    }

    pub fn run_benchmark(&self) -> Result<BenchmarkReport, StorageError> {
        self.services.performance.benchmark()
    }

    /// Returns whether the change started a sync.
    pub fn set_online(&self, online: bool) -> bool {
        self.services.sync.set_online(online)
    }

    pub fn sweep(&self) -> SweepReport {
        self.services.maintenance.sweep()
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.services.health.snapshot()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }
}
