//! Adaptive strategy selection.
//!
//! Both families select a variant from an ordered table of
//! `(predicate, variant)` pairs; the first matching predicate wins and the
//! last entry always matches.

pub mod init;
pub mod optimize;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::Environment;

pub use init::{InitPlan, InitStrategyKind, Phase};
pub use optimize::{OptimizationReport, OptimizationStrategyKind, OptimizationTargets, OptimizationTrigger};

/// Engine services, in startup dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceId {
    ContentStore,
    Timezone,
    Sync,
    Maintenance,
    Health,
    Statistics,
    Performance,
    Warming,
}

impl ServiceId {
    pub const STARTUP_ORDER: [ServiceId; 8] = [
        ServiceId::ContentStore,
        ServiceId::Timezone,
        ServiceId::Sync,
        ServiceId::Maintenance,
        ServiceId::Health,
        ServiceId::Statistics,
        ServiceId::Performance,
        ServiceId::Warming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::ContentStore => "content_store",
            ServiceId::Timezone => "timezone",
            ServiceId::Sync => "sync",
            ServiceId::Maintenance => "maintenance",
            ServiceId::Health => "health",
            ServiceId::Statistics => "statistics",
            ServiceId::Performance => "performance",
            ServiceId::Warming => "warming",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    LowEnd,
    MidRange,
    HighEnd,
}

impl DeviceClass {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" | "low_end" => Some(DeviceClass::LowEnd),
            "mid" | "mid_range" => Some(DeviceClass::MidRange),
            "high" | "high_end" => Some(DeviceClass::HighEnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePattern {
    Light,
    Moderate,
    Heavy,
}

impl UsagePattern {
    /// Classify by recorded interactions.
    pub fn from_interactions(total: u64) -> Self {
        match total {
            0..=4 => UsagePattern::Light,
            5..=19 => UsagePattern::Moderate,
            _ => UsagePattern::Heavy,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "light" => Some(UsagePattern::Light),
            "moderate" => Some(UsagePattern::Moderate),
            "heavy" => Some(UsagePattern::Heavy),
            _ => None,
        }
    }
}

/// Host-supplied device facts. Anything left `None` is derived by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceHints {
    pub device_class: Option<DeviceClass>,
    pub memory_pressure: Option<bool>,
    pub usage_pattern: Option<UsagePattern>,
    #[serde(default)]
    pub background_launch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptimizationContext {
    pub device_class: DeviceClass,
    pub memory_pressure: bool,
    pub performance_issue: bool,
    pub usage_pattern: UsagePattern,
    pub environment: Environment,
}

impl OptimizationContext {
    /// Mid-range device, moderate use, no pressure.
    pub fn baseline(environment: Environment) -> Self {
        Self {
            device_class: DeviceClass::MidRange,
            memory_pressure: false,
            performance_issue: false,
            usage_pattern: UsagePattern::Moderate,
            environment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InitializationContext {
    pub device_class: DeviceClass,
    pub memory_pressure: bool,
    pub performance_issue: bool,
    pub usage_pattern: UsagePattern,
    pub environment: Environment,
    /// The previous run left an error marker.
    pub error_marker: bool,
    /// Time since the last clean shutdown, if one was recorded.
    #[serde(skip)]
    pub since_last_shutdown: Option<Duration>,
    pub background_launch: bool,
}

impl InitializationContext {
    pub fn baseline(environment: Environment) -> Self {
        Self {
            device_class: DeviceClass::MidRange,
            memory_pressure: false,
            performance_issue: false,
            usage_pattern: UsagePattern::Moderate,
            environment,
            error_marker: false,
            since_last_shutdown: None,
            background_launch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_pattern_buckets() {
        assert_eq!(UsagePattern::from_interactions(0), UsagePattern::Light);
        assert_eq!(UsagePattern::from_interactions(5), UsagePattern::Moderate);
        assert_eq!(UsagePattern::from_interactions(50), UsagePattern::Heavy);
    }

    #[test]
    fn test_startup_order_starts_with_store() {
        assert_eq!(ServiceId::STARTUP_ORDER[0], ServiceId::ContentStore);
        assert_eq!(ServiceId::STARTUP_ORDER[7], ServiceId::Warming);
    }
}
