//! Shims for method names from the pre-coordinator API.
//!
//! Everything legacy lives in [`LEGACY_METHODS`] and [`invoke`]. Deleting
//! this module removes the old surface without touching the engine.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::error::{StorageError, SyncError};
use crate::strategy::{DeviceHints, OptimizationTrigger};

/// Release that deprecated the legacy names.
pub const DEPRECATED_SINCE: &str = "0.1.0";

/// Release that removes them.
pub const REMOVAL_VERSION: &str = "0.3.0";

#[derive(Error, Debug)]
pub enum CompatError {
    #[error("Unknown legacy method: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Coordinator call a legacy name maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModernCall {
    GetTodayContent { allow_stale: bool },
    Refresh,
    GetAllStatistics,
    GetAllHealthMetrics,
    GetPerformanceAnalytics,
    RunBenchmark,
    Optimize(OptimizationTrigger),
    Sweep,
    SetOnline(bool),
}

impl ModernCall {
    pub fn signature(&self) -> &'static str {
        match self {
            ModernCall::GetTodayContent { allow_stale: true } => "get_today_content(allow_stale = true)",
            ModernCall::GetTodayContent { allow_stale: false } => "get_today_content(allow_stale = false)",
            ModernCall::Refresh => "refresh()",
            ModernCall::GetAllStatistics => "get_all_statistics()",
            ModernCall::GetAllHealthMetrics => "get_all_health_metrics()",
            ModernCall::GetPerformanceAnalytics => "get_performance_analytics()",
            ModernCall::RunBenchmark => "run_benchmark()",
            ModernCall::Optimize(_) => "execute_optimization_strategy(trigger, context)",
            ModernCall::Sweep => "sweep()",
            ModernCall::SetOnline(true) => "set_online(true)",
            ModernCall::SetOnline(false) => "set_online(false)",
        }
    }
}

pub const LEGACY_METHODS: &[(&str, ModernCall)] = &[
    ("getCachedContent", ModernCall::GetTodayContent { allow_stale: true }),
    ("getTodayContent", ModernCall::GetTodayContent { allow_stale: false }),
    ("getFreshContent", ModernCall::GetTodayContent { allow_stale: false }),
    ("forceRefresh", ModernCall::Refresh),
    ("syncNow", ModernCall::Refresh),
    ("getCacheStats", ModernCall::GetAllStatistics),
    ("getHealthStatus", ModernCall::GetAllHealthMetrics),
    ("getPerformanceMetrics", ModernCall::GetPerformanceAnalytics),
    ("runPerformanceTest", ModernCall::RunBenchmark),
    ("optimizeCache", ModernCall::Optimize(OptimizationTrigger::Manual)),
    ("handleMemoryWarning", ModernCall::Optimize(OptimizationTrigger::MemoryWarning)),
    ("cleanupExpired", ModernCall::Sweep),
    ("onNetworkAvailable", ModernCall::SetOnline(true)),
    ("onNetworkLost", ModernCall::SetOnline(false)),
];

pub fn is_legacy_method(name: &str) -> bool {
    modern_equivalent(name).is_some()
}

pub fn modern_equivalent(name: &str) -> Option<ModernCall> {
    LEGACY_METHODS
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, call)| *call)
}

/// Run a legacy call through the coordinator and return its result as JSON.
pub async fn invoke(coordinator: &Coordinator, name: &str) -> Result<Value, CompatError> {
    let call = modern_equivalent(name).ok_or_else(|| CompatError::UnknownMethod(name.to_string()))?;
    warn!(
        method = name,
        replacement = call.signature(),
        deprecated_since = DEPRECATED_SINCE,
        removal = REMOVAL_VERSION,
        "Deprecated method called"
    );

    let value = match call {
        ModernCall::GetTodayContent { allow_stale } => {
            serde_json::to_value(coordinator.get_today_content(allow_stale).await)?
        }
        ModernCall::Refresh => serde_json::to_value(coordinator.refresh().await?)?,
        ModernCall::GetAllStatistics => serde_json::to_value(coordinator.get_all_statistics().await)?,
        ModernCall::GetAllHealthMetrics => serde_json::to_value(coordinator.get_all_health_metrics().await)?,
        ModernCall::GetPerformanceAnalytics => {
            serde_json::to_value(coordinator.get_performance_analytics().await)?
        }
        ModernCall::RunBenchmark => serde_json::to_value(coordinator.run_benchmark()?)?,
        ModernCall::Optimize(trigger) => {
            let mut hints = DeviceHints::default();
            if trigger == OptimizationTrigger::MemoryWarning {
                hints.memory_pressure = Some(true);
            }
            let context = coordinator.optimization_context(&hints);
            serde_json::to_value(coordinator.execute_optimization_strategy(trigger, &context))?
        }
        ModernCall::Sweep => serde_json::to_value(coordinator.sweep())?,
        ModernCall::SetOnline(online) => Value::Bool(coordinator.set_online(online)),
    };
    Ok(value)
}
