//! Engine configuration.
//!
//! Every tunable the engine uses (intervals, backoff caps, thresholds,
//! retention) lives in [`CacheConfig`]. Defaults depend on the detected
//! [`Environment`]; an optional JSON override file is layered on top.
//!
//! Overrides are read from `~/.config/dayfeed/config.json`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "dayfeed";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable selecting the execution environment.
pub const ENV_VAR: &str = "DAYFEED_ENV";

static PROCESS_CONFIG: OnceLock<CacheConfig> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn from_str(s: Option<&str>) -> Option<Self> {
        match s.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("production") | Some("prod") => Some(Environment::Production),
            Some("development") | Some("dev") => Some(Environment::Development),
            Some("test") | Some("testing") => Some(Environment::Test),
            _ => None,
        }
    }

    /// Detect the environment from `DAYFEED_ENV`, falling back to the build profile.
    pub fn detect() -> Self {
        let var = std::env::var(ENV_VAR).ok();
        if let Some(env) = Self::from_str(var.as_deref()) {
            return env;
        }
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        }
    }
}

/// Latency thresholds in milliseconds for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyThresholds {
    pub excellent_ms: f64,
    pub good_ms: f64,
    pub fair_ms: f64,
}

impl LatencyThresholds {
    pub const fn new(excellent_ms: f64, good_ms: f64, fair_ms: f64) -> Self {
        Self {
            excellent_ms,
            good_ms,
            fair_ms,
        }
    }
}

/// Lower bounds of the health buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.9,
            good: 0.7,
            fair: 0.5,
        }
    }
}

/// Closed set of configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    FreshnessWindow,
    SyncCheckInterval,
    SyncTimeout,
    BackoffBase,
    BackoffCap,
    MaxSyncAttempts,
    MaintenanceInterval,
    RetentionWindow,
    WarmingLeadTime,
    WarmingCheckInterval,
    WarmRestartThreshold,
    TimingSampleCapacity,
    HealthHistoryLimit,
    SyncOutcomeWindow,
    HistoryLimit,
    MemoryWarningMb,
    MemoryCriticalMb,
    ReadLatency,
    WriteLatency,
    LookupLatency,
    HealthBuckets,
    Timezone,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 22] = [
        ConfigKey::FreshnessWindow,
        ConfigKey::SyncCheckInterval,
        ConfigKey::SyncTimeout,
        ConfigKey::BackoffBase,
        ConfigKey::BackoffCap,
        ConfigKey::MaxSyncAttempts,
        ConfigKey::MaintenanceInterval,
        ConfigKey::RetentionWindow,
        ConfigKey::WarmingLeadTime,
        ConfigKey::WarmingCheckInterval,
        ConfigKey::WarmRestartThreshold,
        ConfigKey::TimingSampleCapacity,
        ConfigKey::HealthHistoryLimit,
        ConfigKey::SyncOutcomeWindow,
        ConfigKey::HistoryLimit,
        ConfigKey::MemoryWarningMb,
        ConfigKey::MemoryCriticalMb,
        ConfigKey::ReadLatency,
        ConfigKey::WriteLatency,
        ConfigKey::LookupLatency,
        ConfigKey::HealthBuckets,
        ConfigKey::Timezone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::FreshnessWindow => "freshness_window",
            ConfigKey::SyncCheckInterval => "sync_check_interval",
            ConfigKey::SyncTimeout => "sync_timeout",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::BackoffCap => "backoff_cap",
            ConfigKey::MaxSyncAttempts => "max_sync_attempts",
            ConfigKey::MaintenanceInterval => "maintenance_interval",
            ConfigKey::RetentionWindow => "retention_window",
            ConfigKey::WarmingLeadTime => "warming_lead_time",
            ConfigKey::WarmingCheckInterval => "warming_check_interval",
            ConfigKey::WarmRestartThreshold => "warm_restart_threshold",
            ConfigKey::TimingSampleCapacity => "timing_sample_capacity",
            ConfigKey::HealthHistoryLimit => "health_history_limit",
            ConfigKey::SyncOutcomeWindow => "sync_outcome_window",
            ConfigKey::HistoryLimit => "history_limit",
            ConfigKey::MemoryWarningMb => "memory_warning_mb",
            ConfigKey::MemoryCriticalMb => "memory_critical_mb",
            ConfigKey::ReadLatency => "read_latency",
            ConfigKey::WriteLatency => "write_latency",
            ConfigKey::LookupLatency => "lookup_latency",
            ConfigKey::HealthBuckets => "health_buckets",
            ConfigKey::Timezone => "timezone",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Duration(Duration),
    Count(u64),
    Latency(LatencyThresholds),
    Buckets(HealthThresholds),
    Text(String),
}

impl ConfigValue {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ConfigValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            ConfigValue::Count(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub environment: Environment,
    pub freshness_window: Duration,
    pub sync_check_interval: Duration,
    pub sync_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_sync_attempts: u32,
    pub maintenance_interval: Duration,
    pub retention_window: Duration,
    pub warming_lead_time: Duration,
    pub warming_check_interval: Duration,
    pub warm_restart_threshold: Duration,
    pub timing_sample_capacity: usize,
    pub health_history_limit: usize,
    pub sync_outcome_window: usize,
    pub history_limit: usize,
    pub memory_warning_mb: u64,
    pub memory_critical_mb: u64,
    pub read_thresholds: LatencyThresholds,
    pub write_thresholds: LatencyThresholds,
    pub lookup_thresholds: LatencyThresholds,
    pub health_thresholds: HealthThresholds,
    /// IANA timezone name used for content-day boundaries.
    pub timezone: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Production)
    }
}

impl CacheConfig {
    /// Environment defaults, without any overrides applied.
    pub fn for_environment(environment: Environment) -> Self {
        let base = Self {
            environment,
            freshness_window: Duration::hours(24),
            sync_check_interval: Duration::minutes(15),
            sync_timeout: Duration::seconds(15),
            backoff_base: Duration::seconds(1),
            backoff_cap: Duration::minutes(5),
            max_sync_attempts: 5,
            maintenance_interval: Duration::hours(6),
            retention_window: Duration::days(7),
            warming_lead_time: Duration::minutes(30),
            warming_check_interval: Duration::minutes(10),
            warm_restart_threshold: Duration::minutes(5),
            timing_sample_capacity: 100,
            health_history_limit: 50,
            sync_outcome_window: 20,
            history_limit: 7,
            memory_warning_mb: 150,
            memory_critical_mb: 300,
            read_thresholds: LatencyThresholds::new(50.0, 100.0, 200.0),
            write_thresholds: LatencyThresholds::new(100.0, 250.0, 500.0),
            lookup_thresholds: LatencyThresholds::new(10.0, 25.0, 50.0),
            health_thresholds: HealthThresholds::default(),
            timezone: "UTC".to_string(),
        };

        match environment {
            Environment::Production => base,
            Environment::Development => Self {
                sync_check_interval: Duration::minutes(5),
                sync_timeout: Duration::seconds(30),
                backoff_cap: Duration::minutes(1),
                maintenance_interval: Duration::hours(1),
                retention_window: Duration::days(2),
                warming_check_interval: Duration::minutes(5),
                ..base
            },
            Environment::Test => Self {
                sync_check_interval: Duration::seconds(1),
                sync_timeout: Duration::seconds(2),
                backoff_cap: Duration::seconds(30),
                max_sync_attempts: 3,
                maintenance_interval: Duration::seconds(5),
                retention_window: Duration::hours(1),
                warming_check_interval: Duration::seconds(1),
                timing_sample_capacity: 20,
                health_history_limit: 10,
                ..base
            },
        }
    }

    /// The configuration for this process: detected environment plus the
    /// override file, resolved once and cached for the process lifetime.
    pub fn process() -> &'static CacheConfig {
        PROCESS_CONFIG.get_or_init(|| {
            let environment = Environment::detect();
            let mut config = Self::for_environment(environment);
            match ConfigOverrides::load() {
                Ok(Some(overrides)) => {
                    if let Err(e) = overrides.apply(&mut config) {
                        warn!(error = %e, "Rejected config overrides, using defaults");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to load config overrides, using defaults"),
            }
            debug!(environment = environment.as_str(), "Process configuration resolved");
            config
        })
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn get(&self, key: ConfigKey) -> ConfigValue {
        match key {
            ConfigKey::FreshnessWindow => ConfigValue::Duration(self.freshness_window),
            ConfigKey::SyncCheckInterval => ConfigValue::Duration(self.sync_check_interval),
            ConfigKey::SyncTimeout => ConfigValue::Duration(self.sync_timeout),
            ConfigKey::BackoffBase => ConfigValue::Duration(self.backoff_base),
            ConfigKey::BackoffCap => ConfigValue::Duration(self.backoff_cap),
            ConfigKey::MaxSyncAttempts => ConfigValue::Count(self.max_sync_attempts as u64),
            ConfigKey::MaintenanceInterval => ConfigValue::Duration(self.maintenance_interval),
            ConfigKey::RetentionWindow => ConfigValue::Duration(self.retention_window),
            ConfigKey::WarmingLeadTime => ConfigValue::Duration(self.warming_lead_time),
            ConfigKey::WarmingCheckInterval => ConfigValue::Duration(self.warming_check_interval),
            ConfigKey::WarmRestartThreshold => ConfigValue::Duration(self.warm_restart_threshold),
            ConfigKey::TimingSampleCapacity => ConfigValue::Count(self.timing_sample_capacity as u64),
            ConfigKey::HealthHistoryLimit => ConfigValue::Count(self.health_history_limit as u64),
            ConfigKey::SyncOutcomeWindow => ConfigValue::Count(self.sync_outcome_window as u64),
            ConfigKey::HistoryLimit => ConfigValue::Count(self.history_limit as u64),
            ConfigKey::MemoryWarningMb => ConfigValue::Count(self.memory_warning_mb),
            ConfigKey::MemoryCriticalMb => ConfigValue::Count(self.memory_critical_mb),
            ConfigKey::ReadLatency => ConfigValue::Latency(self.read_thresholds),
            ConfigKey::WriteLatency => ConfigValue::Latency(self.write_thresholds),
            ConfigKey::LookupLatency => ConfigValue::Latency(self.lookup_thresholds),
            ConfigKey::HealthBuckets => ConfigValue::Buckets(self.health_thresholds),
            ConfigKey::Timezone => ConfigValue::Text(self.timezone.clone()),
        }
    }

    /// Check every value. Any failure here aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in ConfigKey::ALL {
            match self.get(key) {
                ConfigValue::Duration(d) if d < Duration::zero() => {
                    return Err(ConfigError::NegativeDuration {
                        key: key.name(),
                        seconds: d.num_seconds(),
                    });
                }
                ConfigValue::Count(0) if key != ConfigKey::HistoryLimit => {
                    return Err(ConfigError::ZeroValue { key: key.name() });
                }
                ConfigValue::Latency(t) => {
                    if !(t.excellent_ms > 0.0 && t.excellent_ms < t.good_ms && t.good_ms < t.fair_ms) {
                        return Err(ConfigError::Unordered {
                            key: key.name(),
                            detail: format!(
                                "expected 0 < {} < {} < {}",
                                t.excellent_ms, t.good_ms, t.fair_ms
                            ),
                        });
                    }
                }
                ConfigValue::Buckets(b) => {
                    if !(b.excellent <= 1.0 && b.excellent > b.good && b.good > b.fair && b.fair >= 0.0) {
                        return Err(ConfigError::Unordered {
                            key: key.name(),
                            detail: format!(
                                "expected 1 >= {} > {} > {} >= 0",
                                b.excellent, b.good, b.fair
                            ),
                        });
                    }
                }
                _ => {}
            }
        }

        for (key, d) in [
            (ConfigKey::SyncCheckInterval, self.sync_check_interval),
            (ConfigKey::SyncTimeout, self.sync_timeout),
            (ConfigKey::BackoffBase, self.backoff_base),
            (ConfigKey::MaintenanceInterval, self.maintenance_interval),
            (ConfigKey::WarmingCheckInterval, self.warming_check_interval),
        ] {
            if d == Duration::zero() {
                return Err(ConfigError::ZeroValue { key: key.name() });
            }
        }

        if self.backoff_base > self.backoff_cap {
            return Err(ConfigError::Unordered {
                key: ConfigKey::BackoffCap.name(),
                detail: format!(
                    "base {}ms exceeds cap {}ms",
                    self.backoff_base.num_milliseconds(),
                    self.backoff_cap.num_milliseconds()
                ),
            });
        }

        if self.memory_warning_mb >= self.memory_critical_mb {
            return Err(ConfigError::Unordered {
                key: ConfigKey::MemoryCriticalMb.name(),
                detail: format!(
                    "warning {}MiB must be below critical {}MiB",
                    self.memory_warning_mb, self.memory_critical_mb
                ),
            });
        }

        Ok(())
    }
}

/// Convert a validated, non-negative duration for use with tokio timers.
pub fn as_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}

/// Optional overrides read from the JSON config file.
///
/// Durations are expressed in seconds so the file stays hand-editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub freshness_window_secs: Option<i64>,
    pub sync_check_interval_secs: Option<i64>,
    pub sync_timeout_secs: Option<i64>,
    pub backoff_base_secs: Option<i64>,
    pub backoff_cap_secs: Option<i64>,
    pub max_sync_attempts: Option<u32>,
    pub maintenance_interval_secs: Option<i64>,
    pub retention_window_secs: Option<i64>,
    pub warming_lead_time_secs: Option<i64>,
    pub timing_sample_capacity: Option<usize>,
    pub memory_warning_mb: Option<u64>,
    pub memory_critical_mb: Option<u64>,
    pub timezone: Option<String>,
}

impl ConfigOverrides {
    /// Load overrides from the default location, if the file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Overrides(format!("{}: {}", path.display(), e)))?;
        let overrides = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Overrides(format!("{}: {}", path.display(), e)))?;
        Ok(Some(overrides))
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Layer the overrides onto `config`. Out-of-range durations are
    /// rejected and leave `config` untouched.
    pub fn apply(&self, config: &mut CacheConfig) -> Result<(), ConfigError> {
        fn secs(field: &str, value: Option<i64>) -> Result<Option<Duration>, ConfigError> {
            value
                .map(|v| {
                    Duration::try_seconds(v)
                        .ok_or_else(|| ConfigError::Overrides(format!("{}: out of range", field)))
                })
                .transpose()
        }

        let durations = [
            (secs("freshness_window_secs", self.freshness_window_secs)?, &mut config.freshness_window),
            (secs("sync_check_interval_secs", self.sync_check_interval_secs)?, &mut config.sync_check_interval),
            (secs("sync_timeout_secs", self.sync_timeout_secs)?, &mut config.sync_timeout),
            (secs("backoff_base_secs", self.backoff_base_secs)?, &mut config.backoff_base),
            (secs("backoff_cap_secs", self.backoff_cap_secs)?, &mut config.backoff_cap),
            (secs("maintenance_interval_secs", self.maintenance_interval_secs)?, &mut config.maintenance_interval),
            (secs("retention_window_secs", self.retention_window_secs)?, &mut config.retention_window),
            (secs("warming_lead_time_secs", self.warming_lead_time_secs)?, &mut config.warming_lead_time),
        ];
        for (value, target) in durations {
            if let Some(d) = value {
                *target = d;
            }
        }

        if let Some(v) = self.max_sync_attempts {
            config.max_sync_attempts = v;
        }
        if let Some(v) = self.timing_sample_capacity {
            config.timing_sample_capacity = v;
        }
        if let Some(v) = self.memory_warning_mb {
            config.memory_warning_mb = v;
        }
        if let Some(v) = self.memory_critical_mb {
            config.memory_critical_mb = v;
        }
        if let Some(ref tz) = self.timezone {
            config.timezone = tz.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_environment_defaults_validate() {
        for env in [Environment::Production, Environment::Development, Environment::Test] {
            let config = CacheConfig::for_environment(env);
            assert!(config.validate().is_ok(), "{} defaults invalid", env.as_str());
        }
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.retention_window = Duration::seconds(-5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NegativeDuration {
                key: "retention_window",
                seconds: -5
            })
        );
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.read_thresholds = LatencyThresholds::new(100.0, 50.0, 200.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Unordered { key: "read_latency", .. })
        ));

        let mut config = CacheConfig::for_environment(Environment::Test);
        config.backoff_base = Duration::minutes(10);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Unordered { key: "backoff_cap", .. })
        ));

        let mut config = CacheConfig::for_environment(Environment::Test);
        config.memory_warning_mb = config.memory_critical_mb;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = CacheConfig::for_environment(Environment::Test);
        config.sync_check_interval = Duration::zero();
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                key: "sync_check_interval"
            })
        );
    }

    #[test]
    fn test_get_returns_typed_values() {
        let config = CacheConfig::for_environment(Environment::Production);
        assert_eq!(
            config.get(ConfigKey::BackoffBase).as_duration(),
            Some(Duration::seconds(1))
        );
        assert_eq!(config.get(ConfigKey::MaxSyncAttempts).as_count(), Some(5));
        assert_eq!(
            config.get(ConfigKey::Timezone),
            ConfigValue::Text("UTC".to_string())
        );
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!(Environment::from_str(Some("PROD")), Some(Environment::Production));
        assert_eq!(Environment::from_str(Some("dev")), Some(Environment::Development));
        assert_eq!(Environment::from_str(Some("test")), Some(Environment::Test));
        assert_eq!(Environment::from_str(Some("staging")), None);
        assert_eq!(Environment::from_str(None), None);
    }

    #[test]
    fn test_overrides_apply_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"backoff_cap_secs": 30, "timezone": "Europe/Berlin", "max_sync_attempts": 2}"#,
        )
        .expect("write overrides");

        let overrides = ConfigOverrides::load_from(&path)
            .expect("load overrides")
            .expect("overrides present");
        let mut config = CacheConfig::for_environment(Environment::Production);
        overrides.apply(&mut config).expect("apply overrides");

        assert_eq!(config.backoff_cap, Duration::seconds(30));
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.max_sync_attempts, 2);
        assert_eq!(config.freshness_window, Duration::hours(24));
    }

    #[test]
    fn test_out_of_range_override_is_an_error() {
        let overrides: ConfigOverrides =
            serde_json::from_str(r#"{"backoff_cap_secs": 9223372036854775807}"#).expect("parse overrides");
        let mut config = CacheConfig::for_environment(Environment::Production);
        let before = config.clone();

        let err = overrides.apply(&mut config).unwrap_err();
        assert_eq!(err, ConfigError::Overrides("backoff_cap_secs: out of range".to_string()));
        assert_eq!(config, before);
    }

    #[test]
    fn test_overrides_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = ConfigOverrides::load_from(&dir.path().join("absent.json"));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_as_std_clamps_negative() {
        assert_eq!(as_std(Duration::seconds(-1)), std::time::Duration::ZERO);
        assert_eq!(as_std(Duration::milliseconds(1500)), std::time::Duration::from_millis(1500));
    }
}
