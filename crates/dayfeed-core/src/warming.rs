//! Predictive pre-fetch of today's content.
//!
//! The first read of each content day is remembered as a local time of day.
//! Once enough of them are known, warming only fires within `lead_time`
//! of their median, so content is fresh before the user usually looks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::content::{ContentStore, Freshness};
use crate::error::SyncError;
use crate::storage;
use crate::sync::{ConnectivitySync, SyncTrigger};
use crate::timezone::TimezoneResolver;

/// Storage key for learned first-access times.
pub const FIRST_ACCESS_KEY: &str = "warming.first_access";

/// Content days of first-access history kept for the median.
const FIRST_ACCESS_SAMPLES: usize = 14;

#[derive(Debug, Clone, Copy)]
pub struct WarmingContext {
    pub now: DateTime<Utc>,
    /// Skip the time-of-day gate.
    pub force: bool,
}

impl WarmingContext {
    pub fn now() -> Self {
        Self {
            now: Utc::now(),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    SyncBusy,
    Offline,
    AlreadyFresh,
    TooEarly { window_opens_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WarmingOutcome {
    Warmed { content_id: String },
    Skipped(SkipReason),
    Failed { error: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FirstAccessHistory {
    /// Seconds after local midnight, oldest first.
    samples: VecDeque<u32>,
    last_day: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmingStatus {
    pub enabled: bool,
    pub lead_time_secs: i64,
    pub typical_first_access: Option<String>,
    pub samples: usize,
    pub attempts: u64,
    pub warmed: u64,
    pub skipped: u64,
    pub last_outcome: Option<WarmingOutcome>,
}

pub struct WarmingService {
    store: Arc<ContentStore>,
    sync: Arc<ConnectivitySync>,
    timezone: Arc<TimezoneResolver>,
    default_lead_time: Duration,
    lead_time: Mutex<Duration>,
    enabled: AtomicBool,
    history: Mutex<FirstAccessHistory>,
    attempts: AtomicU64,
    warmed: AtomicU64,
    skipped: AtomicU64,
    last_outcome: Mutex<Option<WarmingOutcome>>,
}

impl WarmingService {
    pub fn new(
        store: Arc<ContentStore>,
        sync: Arc<ConnectivitySync>,
        timezone: Arc<TimezoneResolver>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            sync,
            timezone,
            default_lead_time: config.warming_lead_time,
            lead_time: Mutex::new(config.warming_lead_time),
            enabled: AtomicBool::new(true),
            history: Mutex::new(FirstAccessHistory::default()),
            attempts: AtomicU64::new(0),
            warmed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }

    /// Restore learned first-access times from storage.
    pub fn load(&self) {
        match storage::load_json::<FirstAccessHistory>(self.store.backend().as_ref(), FIRST_ACCESS_KEY) {
            Ok(Some(mut loaded)) => {
                while loaded.samples.len() > FIRST_ACCESS_SAMPLES {
                    loaded.samples.pop_front();
                }
                debug!(samples = loaded.samples.len(), "First-access history loaded");
                *self.history.lock() = loaded;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load first-access history"),
        }
    }

    /// Note a content read. Only the first one of each content day counts.
    pub fn record_access(&self, at: DateTime<Utc>) {
        let day = self.timezone.content_day_key(at);
        let snapshot = {
            let mut history = self.history.lock();
            if history.last_day.as_deref() == Some(day.as_str()) {
                return;
            }
            let local = self.timezone.local_time(at);
            if history.samples.len() == FIRST_ACCESS_SAMPLES {
                history.samples.pop_front();
            }
            history.samples.push_back(local.num_seconds_from_midnight());
            history.last_day = Some(day);
            history.clone()
        };
        if let Err(e) = storage::save_json(self.store.backend().as_ref(), FIRST_ACCESS_KEY, &snapshot) {
            warn!(error = %e, "Failed to persist first-access history");
        }
    }

    /// Median local time of the first read per content day.
    pub fn typical_first_access(&self) -> Option<NaiveTime> {
        let history = self.history.lock();
        if history.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u32> = history.samples.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];
        NaiveTime::from_num_seconds_from_midnight_opt(median, 0)
    }

    /// Why warming would not run at `ctx.now`, if anything.
    pub fn skip_reason(&self, ctx: &WarmingContext) -> Option<SkipReason> {
        if !self.is_enabled() {
            return Some(SkipReason::Disabled);
        }
        if self.sync.is_busy() {
            return Some(SkipReason::SyncBusy);
        }
        if !self.sync.is_online() {
            return Some(SkipReason::Offline);
        }
        let today = self.timezone.content_day_key(ctx.now);
        let fresh_today = self.store.freshness_at(ctx.now) == Freshness::Fresh
            && self.store.peek().is_some_and(|r| r.content_day == today);
        if fresh_today {
            return Some(SkipReason::AlreadyFresh);
        }
        if !ctx.force {
            if let Some(typical) = self.typical_first_access() {
                let window_opens_at = self.timezone.at_local_time(ctx.now, typical) - self.lead_time();
                if ctx.now < window_opens_at {
                    return Some(SkipReason::TooEarly { window_opens_at });
                }
            }
        }
        None
    }

    pub async fn warm(&self, ctx: WarmingContext) -> WarmingOutcome {
        let outcome = match self.skip_reason(&ctx) {
            Some(reason) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(?reason, "Warming skipped");
                WarmingOutcome::Skipped(reason)
            }
            None => {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                match self.sync.refresh_once(SyncTrigger::Warming).await {
                    Ok(record) => {
                        self.warmed.fetch_add(1, Ordering::Relaxed);
                        info!(content_id = %record.content_id, "Content warmed ahead of first access");
                        WarmingOutcome::Warmed {
                            content_id: record.content_id,
                        }
                    }
                    Err(SyncError::InFlight) | Err(SyncError::BackingOff(_)) => {
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                        WarmingOutcome::Skipped(SkipReason::SyncBusy)
                    }
                    Err(e) => WarmingOutcome::Failed { error: e.to_string() },
                }
            }
        };
        *self.last_outcome.lock() = Some(outcome.clone());
        outcome
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn lead_time(&self) -> Duration {
        *self.lead_time.lock()
    }

    pub fn set_lead_time(&self, lead_time: Duration) {
        *self.lead_time.lock() = lead_time.max(Duration::zero());
    }

    pub fn default_lead_time(&self) -> Duration {
        self.default_lead_time
    }

    pub fn reset(&self) {
        self.set_enabled(true);
        self.set_lead_time(self.default_lead_time);
    }

    /// Share of warming attempts that produced a record; 1.0 before any attempt.
    pub fn success_ratio(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            1.0
        } else {
            self.warmed.load(Ordering::Relaxed) as f64 / attempts as f64
        }
    }

    pub fn status(&self) -> WarmingStatus {
        let samples = self.history.lock().samples.len();
        WarmingStatus {
            enabled: self.is_enabled(),
            lead_time_secs: self.lead_time().num_seconds(),
            typical_first_access: self
                .typical_first_access()
                .map(|t| t.format("%H:%M").to_string()),
            samples,
            attempts: self.attempts.load(Ordering::Relaxed),
            warmed: self.warmed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_outcome: self.last_outcome.lock().clone(),
        }
    }
}
