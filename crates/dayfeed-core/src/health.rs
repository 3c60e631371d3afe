//! Weighted cache health scoring.
//!
//! The overall score is a weighted sum of six dimensions, each normalized to
//! [0, 1] from the owning service's own counters:
//!
//! | dimension   | weight | signal                                          |
//! |-------------|--------|-------------------------------------------------|
//! | content     | 0.25   | fresh / stale / absent, persistence degradation |
//! | sync        | 0.20   | success rate over a rolling outcome window      |
//! | performance | 0.20   | mean latency rating across operation classes    |
//! | integrity   | 0.15   | share of checksum verifications that passed     |
//! | maintenance | 0.10   | recency and outcome of the last sweep           |
//! | timezone    | 0.10   | configured zone resolved vs. UTC fallback       |

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::{CacheConfig, HealthThresholds};
use crate::content::{ContentStore, Freshness};
use crate::stats::PerformanceMonitor;
use crate::timezone::TimezoneResolver;

/// Penalty applied to the content score while the store runs memory-only.
const DEGRADED_CONTENT_PENALTY: f64 = 0.3;

/// Sweep lateness (in multiples of the interval) before the score decays.
const MAINTENANCE_GRACE_FACTOR: f64 = 2.0;

/// Sweep lateness at which the maintenance score reaches zero.
const MAINTENANCE_ZERO_FACTOR: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthDimension {
    Content,
    Sync,
    Performance,
    Integrity,
    Maintenance,
    Timezone,
}

impl HealthDimension {
    pub const ALL: [HealthDimension; 6] = [
        HealthDimension::Content,
        HealthDimension::Sync,
        HealthDimension::Performance,
        HealthDimension::Integrity,
        HealthDimension::Maintenance,
        HealthDimension::Timezone,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            HealthDimension::Content => 0.25,
            HealthDimension::Sync => 0.20,
            HealthDimension::Performance => 0.20,
            HealthDimension::Integrity => 0.15,
            HealthDimension::Maintenance => 0.10,
            HealthDimension::Timezone => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthDimension::Content => "content",
            HealthDimension::Sync => "sync",
            HealthDimension::Performance => "performance",
            HealthDimension::Integrity => "integrity",
            HealthDimension::Maintenance => "maintenance",
            HealthDimension::Timezone => "timezone",
        }
    }

    fn advice(&self) -> &'static str {
        match self {
            HealthDimension::Content => "No fresh content cached: trigger a refresh when online",
            HealthDimension::Sync => "Sync is failing repeatedly: check connectivity and the content source",
            HealthDimension::Performance => "Cache operations are slow: run the performance optimization strategy",
            HealthDimension::Integrity => "Stored records failed verification: invalidate and refetch content",
            HealthDimension::Maintenance => "Maintenance is overdue or failing: run a sweep",
            HealthDimension::Timezone => "Configured timezone is unknown: content days follow UTC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn classify(score: f64, thresholds: &HealthThresholds) -> Self {
        if score >= thresholds.excellent {
            HealthStatus::Excellent
        } else if score >= thresholds.good {
            HealthStatus::Good
        } else if score >= thresholds.fair {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
        }
    }

    fn remediation(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "Cache is operating optimally",
            HealthStatus::Good => "Cache is healthy; keep an eye on sync success rate",
            HealthStatus::Fair => "Cache health is degraded; run maintenance and refresh content",
            HealthStatus::Poor => "Cache health is poor; refresh content and check connectivity and storage",
        }
    }
}

/// Immutable point-in-time health record.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub dimension_scores: BTreeMap<HealthDimension, f64>,
    pub overall_score: f64,
    pub status: HealthStatus,
    pub recommendations: Vec<String>,
}

impl HealthSnapshot {
    /// Build a snapshot from raw dimension scores. Missing dimensions count as 0.
    pub fn from_scores(
        timestamp: DateTime<Utc>,
        scores: BTreeMap<HealthDimension, f64>,
        thresholds: &HealthThresholds,
    ) -> Self {
        let dimension_scores: BTreeMap<HealthDimension, f64> = HealthDimension::ALL
            .iter()
            .map(|d| (*d, clamp_unit(scores.get(d).copied().unwrap_or(0.0))))
            .collect();
        let overall_score = weighted_score(&dimension_scores);
        let status = HealthStatus::classify(overall_score, thresholds);

        let mut recommendations = vec![status.remediation().to_string()];
        for (dimension, score) in &dimension_scores {
            if *score < 0.5 {
                recommendations.push(dimension.advice().to_string());
            }
        }

        Self {
            timestamp,
            dimension_scores,
            overall_score,
            status,
            recommendations,
        }
    }

    /// Lowest-scoring dimension, if any scored below 1.
    pub fn weakest_dimension(&self) -> Option<(HealthDimension, f64)> {
        self.dimension_scores
            .iter()
            .filter(|(_, s)| **s < 1.0)
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(d, s)| (*d, *s))
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn weighted_score(scores: &BTreeMap<HealthDimension, f64>) -> f64 {
    let total: f64 = scores
        .iter()
        .map(|(d, s)| d.weight() * clamp_unit(*s))
        .sum();
    clamp_unit(total)
}

#[derive(Debug, Clone, Copy)]
struct SweepSignal {
    at: DateTime<Utc>,
    ok: bool,
}

/// Computes health from the other services' live signals and keeps a
/// bounded history of snapshots.
pub struct HealthMonitor {
    store: Arc<ContentStore>,
    performance: Arc<PerformanceMonitor>,
    timezone: Arc<TimezoneResolver>,
    thresholds: HealthThresholds,
    maintenance_interval: Duration,
    started_at: DateTime<Utc>,
    sync_window: usize,
    sync_outcomes: Mutex<VecDeque<bool>>,
    last_sweep: Mutex<Option<SweepSignal>>,
    history: Mutex<VecDeque<HealthSnapshot>>,
    history_limit: Mutex<usize>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<ContentStore>,
        performance: Arc<PerformanceMonitor>,
        timezone: Arc<TimezoneResolver>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            performance,
            timezone,
            thresholds: config.health_thresholds,
            maintenance_interval: config.maintenance_interval,
            started_at: Utc::now(),
            sync_window: config.sync_outcome_window.max(1),
            sync_outcomes: Mutex::new(VecDeque::new()),
            last_sweep: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            history_limit: Mutex::new(config.health_history_limit.max(1)),
        }
    }

    pub fn record_sync_outcome(&self, success: bool) {
        let mut outcomes = self.sync_outcomes.lock();
        if outcomes.len() == self.sync_window {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    pub fn record_sweep(&self, at: DateTime<Utc>, ok: bool) {
        *self.last_sweep.lock() = Some(SweepSignal { at, ok });
    }

    /// Success rate over the rolling window; 1.0 before any outcome.
    pub fn sync_success_rate(&self) -> f64 {
        let outcomes = self.sync_outcomes.lock();
        if outcomes.is_empty() {
            return 1.0;
        }
        outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64
    }

    pub fn dimension_scores_at(&self, now: DateTime<Utc>) -> BTreeMap<HealthDimension, f64> {
        let mut scores = BTreeMap::new();
        scores.insert(HealthDimension::Content, self.content_score(now));
        scores.insert(HealthDimension::Sync, self.sync_success_rate());
        scores.insert(HealthDimension::Performance, self.performance.analyze().score);
        scores.insert(HealthDimension::Integrity, self.integrity_score());
        scores.insert(HealthDimension::Maintenance, self.maintenance_score(now));
        scores.insert(
            HealthDimension::Timezone,
            if self.timezone.fell_back() { 0.5 } else { 1.0 },
        );
        scores
    }

    /// Current health, computed without side effects.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
        HealthSnapshot::from_scores(now, self.dimension_scores_at(now), &self.thresholds)
    }

    /// Compute a snapshot and append it to the bounded history.
    pub fn record_snapshot(&self) -> HealthSnapshot {
        let snapshot = self.snapshot();
        let limit = *self.history_limit.lock();
        let mut history = self.history.lock();
        history.push_back(snapshot.clone());
        while history.len() > limit {
            history.pop_front();
        }
        debug!(
            score = snapshot.overall_score,
            status = snapshot.status.as_str(),
            "Health snapshot recorded"
        );
        snapshot
    }

    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    /// Shrink the history bound; returns the number of snapshots dropped.
    pub fn set_history_limit(&self, limit: usize) -> usize {
        let limit = limit.max(1);
        *self.history_limit.lock() = limit;
        let mut history = self.history.lock();
        let mut dropped = 0;
        while history.len() > limit {
            history.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn history_limit(&self) -> usize {
        *self.history_limit.lock()
    }

    fn content_score(&self, now: DateTime<Utc>) -> f64 {
        let base = match self.store.freshness_at(now) {
            Freshness::Fresh => 1.0,
            Freshness::Stale => 0.6,
            Freshness::Absent => 0.0,
        };
        if self.store.is_degraded() {
            (base - DEGRADED_CONTENT_PENALTY).max(0.0)
        } else {
            base
        }
    }

    fn integrity_score(&self) -> f64 {
        let (checks, failures) = self.store.integrity_counts();
        if checks == 0 {
            1.0
        } else {
            1.0 - failures as f64 / checks as f64
        }
    }

    fn maintenance_score(&self, now: DateTime<Utc>) -> f64 {
        let signal = *self.last_sweep.lock();
        let reference = signal.map(|s| s.at).unwrap_or(self.started_at);
        let interval_ms = self.maintenance_interval.num_milliseconds().max(1) as f64;
        let lateness = (now - reference).num_milliseconds().max(0) as f64 / interval_ms;

        let recency = if lateness <= MAINTENANCE_GRACE_FACTOR {
            1.0
        } else if lateness >= MAINTENANCE_ZERO_FACTOR {
            0.0
        } else {
            (MAINTENANCE_ZERO_FACTOR - lateness) / (MAINTENANCE_ZERO_FACTOR - MAINTENANCE_GRACE_FACTOR)
        };

        match signal {
            Some(s) if !s.ok => recency * 0.5,
            _ => recency,
        }
    }
}
