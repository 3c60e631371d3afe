//! Construction of the engine's service graph.
//!
//! Every service is built once here and shared via `Arc`. Dependencies flow
//! one way: the health monitor reads the store and performance monitor, and
//! everything that produces health signals pushes them into it.

use std::sync::Arc;

use crate::config::CacheConfig;
use crate::content::ContentStore;
use crate::health::HealthMonitor;
use crate::maintenance::MaintenanceService;
use crate::source::ContentSource;
use crate::stats::{PerformanceMonitor, StatisticsCollector};
use crate::storage::KeyValueStore;
use crate::strategy::OptimizationTargets;
use crate::sync::ConnectivitySync;
use crate::timezone::TimezoneResolver;
use crate::warming::WarmingService;

pub struct Services {
    pub config: CacheConfig,
    pub backend: Arc<dyn KeyValueStore>,
    pub stats: Arc<StatisticsCollector>,
    pub store: Arc<ContentStore>,
    pub timezone: Arc<TimezoneResolver>,
    pub performance: Arc<PerformanceMonitor>,
    pub health: Arc<HealthMonitor>,
    pub sync: Arc<ConnectivitySync>,
    pub maintenance: Arc<MaintenanceService>,
    pub warming: Arc<WarmingService>,
}

impl Services {
    pub fn new(
        config: CacheConfig,
        backend: Arc<dyn KeyValueStore>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        let stats = Arc::new(StatisticsCollector::new(config.timing_sample_capacity));
        let store = Arc::new(ContentStore::new(
            Arc::clone(&backend),
            Arc::clone(&stats),
            config.history_limit,
        ));
        let timezone = Arc::new(TimezoneResolver::new(&config.timezone));
        let performance = Arc::new(PerformanceMonitor::new(Arc::clone(&stats), &config));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            Arc::clone(&performance),
            Arc::clone(&timezone),
            &config,
        ));
        let sync = Arc::new(ConnectivitySync::new(
            Arc::clone(&store),
            Arc::clone(&timezone),
            source,
            Arc::clone(&stats),
            Arc::clone(&health),
            &config,
        ));
        let maintenance = Arc::new(MaintenanceService::new(
            Arc::clone(&store),
            Arc::clone(&sync),
            Arc::clone(&stats),
            Arc::clone(&health),
            &config,
        ));
        let warming = Arc::new(WarmingService::new(
            Arc::clone(&store),
            Arc::clone(&sync),
            Arc::clone(&timezone),
            &config,
        ));

        Self {
            config,
            backend,
            stats,
            store,
            timezone,
            performance,
            health,
            sync,
            maintenance,
            warming,
        }
    }

    pub fn optimization_targets(&self) -> OptimizationTargets<'_> {
        OptimizationTargets {
            config: &self.config,
            store: &self.store,
            stats: &self.stats,
            health: &self.health,
            sync: &self.sync,
            maintenance: &self.maintenance,
            warming: &self.warming,
        }
    }

    /// Resident size of the engine's own state, in MiB.
    pub fn resident_mb(&self) -> f64 {
        let bytes = self.store.estimated_bytes()
            + self.stats.sample_count() * std::mem::size_of::<f64>();
        bytes as f64 / (1024.0 * 1024.0)
    }
}
