use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{DeviceClass, OptimizationContext, UsagePattern};
use crate::config::CacheConfig;
use crate::content::ContentStore;
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::maintenance::MaintenanceService;
use crate::stats::{OperationClass, StatisticsCollector};
use crate::sync::ConnectivitySync;
use crate::warming::WarmingService;

/// Resident size of one timing sample.
const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f64>();

/// Rough resident size of one health snapshot with its recommendation text.
const BYTES_PER_SNAPSHOT: usize = std::mem::size_of::<HealthSnapshot>() + 256;

/// Share of foreground fetch latency warming is expected to hide.
const WARM_HIT_SHARE: f64 = 0.5;

/// Expected latency reduction from compacting buffers and tightening timeouts.
const PERFORMANCE_GAIN: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTrigger {
    MemoryWarning,
    PerformanceDegraded,
    AppForeground,
    AppBackground,
    Scheduled,
    Manual,
}

impl OptimizationTrigger {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "memory_warning" | "memory" => Some(OptimizationTrigger::MemoryWarning),
            "performance_degraded" | "performance" => Some(OptimizationTrigger::PerformanceDegraded),
            "app_foreground" | "foreground" => Some(OptimizationTrigger::AppForeground),
            "app_background" | "background" => Some(OptimizationTrigger::AppBackground),
            "scheduled" => Some(OptimizationTrigger::Scheduled),
            "manual" => Some(OptimizationTrigger::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategyKind {
    MemoryOptimized,
    PerformanceOptimized,
    Aggressive,
    Conservative,
    Balanced,
}

type OptimizationRule = (fn(&OptimizationContext) -> bool, OptimizationStrategyKind);

fn under_memory_pressure(ctx: &OptimizationContext) -> bool {
    ctx.memory_pressure
}

fn has_performance_issue(ctx: &OptimizationContext) -> bool {
    ctx.performance_issue
}

fn heavy_use_on_capable_device(ctx: &OptimizationContext) -> bool {
    ctx.usage_pattern == UsagePattern::Heavy && ctx.device_class != DeviceClass::LowEnd
}

fn light_use_or_low_end(ctx: &OptimizationContext) -> bool {
    ctx.usage_pattern == UsagePattern::Light || ctx.device_class == DeviceClass::LowEnd
}

fn always(_: &OptimizationContext) -> bool {
    true
}

/// Evaluated top to bottom; the last rule always matches.
const OPTIMIZATION_RULES: [OptimizationRule; 5] = [
    (under_memory_pressure, OptimizationStrategyKind::MemoryOptimized),
    (has_performance_issue, OptimizationStrategyKind::PerformanceOptimized),
    (heavy_use_on_capable_device, OptimizationStrategyKind::Aggressive),
    (light_use_or_low_end, OptimizationStrategyKind::Conservative),
    (always, OptimizationStrategyKind::Balanced),
];

pub fn select(ctx: &OptimizationContext) -> OptimizationStrategyKind {
    OPTIMIZATION_RULES
        .iter()
        .find(|(matches, _)| matches(ctx))
        .map(|(_, kind)| *kind)
        .unwrap_or(OptimizationStrategyKind::Balanced)
}

/// Services an optimization plan may retune.
pub struct OptimizationTargets<'a> {
    pub config: &'a CacheConfig,
    pub store: &'a ContentStore,
    pub stats: &'a StatisticsCollector,
    pub health: &'a HealthMonitor,
    pub sync: &'a ConnectivitySync,
    pub maintenance: &'a MaintenanceService,
    pub warming: &'a WarmingService,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub strategy: OptimizationStrategyKind,
    pub trigger: OptimizationTrigger,
    pub actions: Vec<String>,
    pub memory_freed_bytes: u64,
    /// Negative values are an expected improvement.
    pub projected_latency_delta_ms: f64,
    pub elapsed_ms: f64,
}

impl OptimizationStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategyKind::MemoryOptimized => "memory_optimized",
            OptimizationStrategyKind::PerformanceOptimized => "performance_optimized",
            OptimizationStrategyKind::Aggressive => "aggressive",
            OptimizationStrategyKind::Conservative => "conservative",
            OptimizationStrategyKind::Balanced => "balanced",
        }
    }

    pub fn execute(&self, trigger: OptimizationTrigger, targets: &OptimizationTargets<'_>) -> OptimizationReport {
        let started = Instant::now();
        let mut actions = Vec::new();
        let mut freed: usize = 0;
        let mut projected = 0.0;

        let config = targets.config;
        let default_capacity = config.timing_sample_capacity;
        let sync_mean_ms = targets
            .stats
            .summary(OperationClass::Sync)
            .map(|s| s.mean_ms)
            .unwrap_or(0.0);

        match self {
            OptimizationStrategyKind::MemoryOptimized => {
                let evicted = targets.store.evict_history(1);
                freed += evicted.freed_bytes;
                actions.push(format!("evicted {} superseded records", evicted.removed_records));

                let capacity = (targets.stats.sample_capacity() / 2).max(1);
                let dropped = targets.stats.set_sample_capacity(capacity);
                freed += dropped * BYTES_PER_SAMPLE;
                actions.push(format!("shrank timing buffers to {} samples", capacity));

                let limit = (targets.health.history_limit() / 2).max(1);
                let trimmed = targets.health.set_history_limit(limit);
                freed += trimmed * BYTES_PER_SNAPSHOT;
                actions.push(format!("trimmed health history to {} snapshots", limit));

                let sweep = targets.maintenance.sweep();
                freed += sweep.freed_bytes;
                actions.push(format!("ran maintenance sweep ({} records purged)", sweep.removed_records));
            }
            OptimizationStrategyKind::PerformanceOptimized => {
                let timeout = (targets.sync.default_fetch_timeout() / 2).max(std::time::Duration::from_secs(1));
                targets.sync.set_fetch_timeout(timeout);
                actions.push(format!("tightened fetch timeout to {}ms", timeout.as_millis()));

                let attempts = (targets.sync.default_max_attempts() / 2).max(1);
                targets.sync.set_max_attempts(attempts);
                actions.push(format!("reduced attempt budget to {}", attempts));

                let dropped = targets.stats.compact(default_capacity / 2);
                freed += dropped * BYTES_PER_SAMPLE;
                actions.push(format!("compacted timing buffers ({} samples dropped)", dropped));

                let mean_latency = mean_class_latency(targets.stats);
                projected = -(mean_latency * PERFORMANCE_GAIN);
            }
            OptimizationStrategyKind::Aggressive => {
                let lead = targets.warming.default_lead_time() * 2;
                targets.warming.set_enabled(true);
                targets.warming.set_lead_time(lead);
                actions.push(format!("enabled warming with {}min lead time", lead.num_minutes()));

                targets.sync.reset_tuning();
                actions.push(format!("restored full attempt budget of {}", targets.sync.max_attempts()));

                targets.stats.set_sample_capacity(default_capacity);
                projected = -(sync_mean_ms * WARM_HIT_SHARE);
            }
            OptimizationStrategyKind::Conservative => {
                let capacity = (default_capacity / 2).max(1);
                let dropped = targets.stats.set_sample_capacity(capacity);
                freed += dropped * BYTES_PER_SAMPLE;
                actions.push(format!("reduced timing buffers to {} samples", capacity));

                targets.warming.set_enabled(false);
                actions.push("disabled warming".to_string());

                let timeout = targets.sync.default_fetch_timeout() * 2;
                targets.sync.set_fetch_timeout(timeout);
                actions.push(format!("relaxed fetch timeout to {}ms", timeout.as_millis()));

                projected = sync_mean_ms * WARM_HIT_SHARE;
            }
            OptimizationStrategyKind::Balanced => {
                targets.sync.reset_tuning();
                targets.warming.reset();
                targets.stats.set_sample_capacity(default_capacity);
                targets.health.set_history_limit(config.health_history_limit);
                actions.push("restored configured defaults".to_string());
            }
        }

        let report = OptimizationReport {
            strategy: *self,
            trigger,
            actions,
            memory_freed_bytes: freed as u64,
            projected_latency_delta_ms: projected,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            strategy = self.as_str(),
            freed_bytes = report.memory_freed_bytes,
            actions = report.actions.len(),
            "Optimization strategy applied"
        );
        report
    }
}

fn mean_class_latency(stats: &StatisticsCollector) -> f64 {
    let means: Vec<f64> = OperationClass::ALL
        .iter()
        .filter_map(|class| stats.summary(*class))
        .map(|s| s.mean_ms)
        .collect();
    if means.is_empty() {
        0.0
    } else {
        means.iter().sum::<f64>() / means.len() as f64
    }
}
