use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::timing::{OperationClass, TimingBuffer, TimingSummary};
use crate::error::StorageError;
use crate::storage::{self, KeyValueStore};

/// Storage key for the persisted counters snapshot.
pub const METRICS_SNAPSHOT_KEY: &str = "metrics.snapshot";

/// User interactions the application reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Share,
    Bookmark,
    ExternalLink,
    Refresh,
    Dismiss,
}

impl InteractionKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Some(InteractionKind::View),
            "share" => Some(InteractionKind::Share),
            "bookmark" => Some(InteractionKind::Bookmark),
            "external_link" | "link" => Some(InteractionKind::ExternalLink),
            "refresh" => Some(InteractionKind::Refresh),
            "dismiss" => Some(InteractionKind::Dismiss),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    persistence_failures: AtomicU64,
    invalidations: AtomicU64,
    sync_attempts: AtomicU64,
    sync_successes: AtomicU64,
    sync_transient_failures: AtomicU64,
    sync_permanent_failures: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub reads: u64,
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub persistence_failures: u64,
    pub invalidations: u64,
    pub sync_attempts: u64,
    pub sync_successes: u64,
    pub sync_transient_failures: u64,
    pub sync_permanent_failures: u64,
    pub interactions: BTreeMap<InteractionKind, u64>,
    pub timings: BTreeMap<OperationClass, TimingSummary>,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStatistics {
    pub saved_at: DateTime<Utc>,
    pub statistics: StatisticsSnapshot,
}

/// Operation counters and per-class timing buffers.
///
/// Counters are lock-free; timing buffers share one mutex since samples are
/// recorded far less often than counters are read.
pub struct StatisticsCollector {
    counters: Counters,
    timings: Mutex<HashMap<OperationClass, TimingBuffer>>,
    interactions: Mutex<HashMap<InteractionKind, u64>>,
    capacity: Mutex<usize>,
}

impl StatisticsCollector {
    pub fn new(sample_capacity: usize) -> Self {
        let timings = OperationClass::ALL
            .iter()
            .map(|class| (*class, TimingBuffer::new(sample_capacity)))
            .collect();
        Self {
            counters: Counters::default(),
            timings: Mutex::new(timings),
            interactions: Mutex::new(HashMap::new()),
            capacity: Mutex::new(sample_capacity.max(1)),
        }
    }

    pub fn record_timing(&self, class: OperationClass, elapsed: Duration) {
        let capacity = *self.capacity.lock();
        self.timings
            .lock()
            .entry(class)
            .or_insert_with(|| TimingBuffer::new(capacity))
            .push(elapsed);
    }

    pub fn record_read(&self, outcome: ReadOutcome, elapsed: Duration) {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ReadOutcome::Fresh => &self.counters.fresh_hits,
            ReadOutcome::Stale => &self.counters.stale_hits,
            ReadOutcome::Miss => &self.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_timing(OperationClass::Read, elapsed);
    }

    pub fn record_write(&self, elapsed: Duration) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.record_timing(OperationClass::Write, elapsed);
    }

    pub fn record_persistence_failure(&self) {
        self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_attempt(&self) {
        self.counters.sync_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_success(&self, elapsed: Duration) {
        self.counters.sync_successes.fetch_add(1, Ordering::Relaxed);
        self.record_timing(OperationClass::Sync, elapsed);
    }

    pub fn record_sync_failure(&self, permanent: bool) {
        let counter = if permanent {
            &self.counters.sync_permanent_failures
        } else {
            &self.counters.sync_transient_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interaction(&self, kind: InteractionKind) {
        *self.interactions.lock().entry(kind).or_insert(0) += 1;
    }

    pub fn total_interactions(&self) -> u64 {
        self.interactions.lock().values().sum()
    }

    pub fn persistence_failures(&self) -> u64 {
        self.counters.persistence_failures.load(Ordering::Relaxed)
    }

    pub fn summary(&self, class: OperationClass) -> Option<TimingSummary> {
        self.timings.lock().get(&class).and_then(|b| b.summary())
    }

    /// Fraction of reads that returned any record (fresh or stale).
    pub fn hit_rate(&self) -> f64 {
        let reads = self.counters.reads.load(Ordering::Relaxed);
        if reads == 0 {
            return 0.0;
        }
        let hits = self.counters.fresh_hits.load(Ordering::Relaxed)
            + self.counters.stale_hits.load(Ordering::Relaxed);
        hits as f64 / reads as f64
    }

    pub fn sample_count(&self) -> usize {
        self.timings.lock().values().map(|b| b.len()).sum()
    }

    pub fn sample_capacity(&self) -> usize {
        *self.capacity.lock()
    }

    /// Resize every timing buffer. Returns the number of samples dropped.
    pub fn set_sample_capacity(&self, capacity: usize) -> usize {
        let capacity = capacity.max(1);
        *self.capacity.lock() = capacity;
        self.timings
            .lock()
            .values_mut()
            .map(|b| b.resize(capacity))
            .sum()
    }

    /// Trim every buffer to at most `keep` samples without changing capacity.
    pub fn compact(&self, keep: usize) -> usize {
        let capacity = *self.capacity.lock();
        let keep = keep.max(1).min(capacity);
        let mut timings = self.timings.lock();
        let mut dropped = 0;
        for buffer in timings.values_mut() {
            dropped += buffer.resize(keep);
            buffer.resize(capacity);
        }
        dropped
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let c = &self.counters;
        let timings = self
            .timings
            .lock()
            .iter()
            .filter_map(|(class, buffer)| buffer.summary().map(|s| (*class, s)))
            .collect();
        let interactions = self
            .interactions
            .lock()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();

        StatisticsSnapshot {
            reads: c.reads.load(Ordering::Relaxed),
            fresh_hits: c.fresh_hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            persistence_failures: c.persistence_failures.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            sync_attempts: c.sync_attempts.load(Ordering::Relaxed),
            sync_successes: c.sync_successes.load(Ordering::Relaxed),
            sync_transient_failures: c.sync_transient_failures.load(Ordering::Relaxed),
            sync_permanent_failures: c.sync_permanent_failures.load(Ordering::Relaxed),
            interactions,
            timings,
            hit_rate: self.hit_rate(),
        }
    }

    /// Persist the current counters so they survive a restart.
    pub fn flush(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        let persisted = PersistedStatistics {
            saved_at: Utc::now(),
            statistics: self.snapshot(),
        };
        storage::save_json(store, METRICS_SNAPSHOT_KEY, &persisted)
    }

    pub fn load_persisted(store: &dyn KeyValueStore) -> Result<Option<PersistedStatistics>, StorageError> {
        storage::load_json(store, METRICS_SNAPSHOT_KEY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Fresh,
    Stale,
    Miss,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_read_counters_and_hit_rate() {
        let stats = StatisticsCollector::new(10);
        stats.record_read(ReadOutcome::Fresh, Duration::from_millis(1));
        stats.record_read(ReadOutcome::Stale, Duration::from_millis(2));
        stats.record_read(ReadOutcome::Miss, Duration::from_millis(3));
        stats.record_read(ReadOutcome::Fresh, Duration::from_millis(4));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reads, 4);
        assert_eq!(snapshot.fresh_hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hit_rate, 0.75);
        assert_eq!(snapshot.timings[&OperationClass::Read].count, 4);
    }

    #[test]
    fn test_hit_rate_without_reads() {
        assert_eq!(StatisticsCollector::new(5).hit_rate(), 0.0);
    }

    #[test]
    fn test_compact_keeps_capacity() {
        let stats = StatisticsCollector::new(10);
        for i in 0..10 {
            stats.record_write(Duration::from_millis(i));
        }
        assert_eq!(stats.compact(3), 7);
        assert_eq!(stats.sample_count(), 3);
        assert_eq!(stats.sample_capacity(), 10);
        // Compacting again is a no-op
        assert_eq!(stats.compact(3), 0);
    }

    #[test]
    fn test_set_sample_capacity() {
        let stats = StatisticsCollector::new(10);
        for i in 0..8 {
            stats.record_timing(OperationClass::Lookup, Duration::from_millis(i));
        }
        assert_eq!(stats.set_sample_capacity(5), 3);
        assert_eq!(stats.sample_capacity(), 5);
        for i in 0..8 {
            stats.record_timing(OperationClass::Lookup, Duration::from_millis(i));
        }
        assert_eq!(stats.summary(OperationClass::Lookup).unwrap().count, 5);
    }

    #[test]
    fn test_interactions() {
        let stats = StatisticsCollector::new(5);
        stats.record_interaction(InteractionKind::View);
        stats.record_interaction(InteractionKind::View);
        stats.record_interaction(InteractionKind::Share);
        assert_eq!(stats.total_interactions(), 3);
        assert_eq!(stats.snapshot().interactions[&InteractionKind::View], 2);
        assert_eq!(InteractionKind::from_str("LINK"), Some(InteractionKind::ExternalLink));
        assert_eq!(InteractionKind::from_str("swipe"), None);
    }

    #[test]
    fn test_flush_and_load() {
        let store = MemoryStore::new();
        let stats = StatisticsCollector::new(5);
        stats.record_sync_attempt();
        stats.record_sync_failure(false);
        stats.flush(&store).unwrap();

        let persisted = StatisticsCollector::load_persisted(&store).unwrap().unwrap();
        assert_eq!(persisted.statistics.sync_attempts, 1);
        assert_eq!(persisted.statistics.sync_transient_failures, 1);
    }
}
