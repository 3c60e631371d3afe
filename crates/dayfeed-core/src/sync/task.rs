use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Storage key mirroring the in-flight task.
pub const TASK_KEY: &str = "sync.task";

/// Exponential backoff, `delay(n) = min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::zero();
        }
        // 2^31 already overflows any sane base; saturate before multiplying.
        let exponent = (failures - 1).min(30);
        let base_ms = self.base.num_milliseconds().max(0);
        let delay_ms = base_ms.saturating_mul(1_i64 << exponent);
        Duration::milliseconds(delay_ms).min(self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    ExplicitRefresh,
    Periodic,
    StaleRead,
    /// Foreground read found no record at all.
    ColdMiss,
    Warming,
    Startup,
}

impl SyncTrigger {
    /// Triggers a user is waiting on skip a pending backoff window.
    pub fn bypasses_backoff(&self) -> bool {
        matches!(self, SyncTrigger::ExplicitRefresh | SyncTrigger::ColdMiss)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::ConnectivityRestored => "connectivity_restored",
            SyncTrigger::ExplicitRefresh => "explicit_refresh",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::StaleRead => "stale_read",
            SyncTrigger::ColdMiss => "cold_miss",
            SyncTrigger::Warming => "warming",
            SyncTrigger::Startup => "startup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Backoff { until: DateTime<Utc> },
}

/// One synchronization attempt sequence, from trigger to success or
/// permanent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub task_id: String,
    pub trigger: SyncTrigger,
    pub triggered_at: DateTime<Utc>,
    pub attempt: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncTask {
    pub fn new(trigger: SyncTrigger, triggered_at: DateTime<Utc>) -> Self {
        Self {
            task_id: format!("{:016x}", rand::random::<u64>()),
            trigger,
            triggered_at,
            attempt: 0,
            backoff_until: None,
            last_error: None,
        }
    }
}
