use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::record::ContentRecord;
use crate::error::StorageError;
use crate::stats::{OperationClass, ReadOutcome, StatisticsCollector};
use crate::storage::{self, KeyValueStore};

pub const CURRENT_KEY: &str = "content.current";
pub const HISTORY_KEY: &str = "content.history";
pub const META_KEY: &str = "content.meta";

/// Bumped when the persisted record layout changes.
const SCHEMA_VERSION: u32 = 1;

/// Validation metadata stored next to the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_checksum: Option<String>,
    pub schema_version: u32,
    pub write_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    Absent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub removed_records: usize,
    pub freed_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentStoreStatus {
    pub backend: &'static str,
    pub freshness: Freshness,
    pub content_id: Option<String>,
    pub content_day: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub age: Option<String>,
    pub history_len: usize,
    pub degraded: bool,
    pub resident_bytes: usize,
    pub integrity_checks: u64,
    pub integrity_failures: u64,
    pub meta: ContentMeta,
}

#[derive(Debug, Default)]
struct StoreState {
    current: Option<ContentRecord>,
    /// Superseded records, newest first.
    history: VecDeque<ContentRecord>,
    meta: ContentMeta,
}

/// Durable storage of the current content record.
///
/// Reads take a shared lock on in-memory state and never touch the backend.
/// Writes are serialized through `write_lock` and persisted replace-on-write;
/// when the backend fails the in-memory state is still updated and the store
/// reports itself degraded.
pub struct ContentStore {
    backend: Arc<dyn KeyValueStore>,
    stats: Arc<StatisticsCollector>,
    state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    history_limit: usize,
    degraded: AtomicBool,
    integrity_checks: AtomicU64,
    integrity_failures: AtomicU64,
}

impl ContentStore {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        stats: Arc<StatisticsCollector>,
        history_limit: usize,
    ) -> Self {
        Self {
            backend,
            stats,
            state: RwLock::new(StoreState::default()),
            write_lock: Mutex::new(()),
            history_limit,
            degraded: AtomicBool::new(false),
            integrity_checks: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.backend
    }

    /// Hydrate in-memory state from the backend, dropping entries that fail
    /// their checksum. Storage errors leave the store empty and degraded.
    pub fn load(&self) {
        let _guard = self.write_lock.lock();
        let started = Instant::now();

        let current = match storage::load_json::<ContentRecord>(self.backend.as_ref(), CURRENT_KEY) {
            Ok(Some(record)) => {
                if self.check_record(&record) {
                    Some(record)
                } else {
                    warn!(content_id = %record.content_id, "Stored record failed integrity check, discarding");
                    if let Err(e) = self.backend.remove(CURRENT_KEY) {
                        warn!(error = %e, "Failed to remove corrupt record");
                    }
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load current record");
                self.mark_degraded();
                None
            }
        };

        let history: VecDeque<ContentRecord> =
            match storage::load_json::<Vec<ContentRecord>>(self.backend.as_ref(), HISTORY_KEY) {
                Ok(Some(records)) => records
                    .into_iter()
                    .filter(|r| self.check_record(r))
                    .take(self.history_limit)
                    .collect(),
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!(error = %e, "Failed to load record history");
                    VecDeque::new()
                }
            };

        let meta = match storage::load_json::<ContentMeta>(self.backend.as_ref(), META_KEY) {
            Ok(Some(meta)) => meta,
            Ok(None) => ContentMeta {
                schema_version: SCHEMA_VERSION,
                ..Default::default()
            },
            Err(e) => {
                warn!(error = %e, "Failed to load content metadata");
                ContentMeta {
                    schema_version: SCHEMA_VERSION,
                    ..Default::default()
                }
            }
        };

        let has_current = current.is_some();
        let history_len = history.len();
        *self.state.write() = StoreState {
            current,
            history,
            meta,
        };
        self.stats
            .record_timing(OperationClass::Lookup, started.elapsed());
        info!(has_current, history_len, "Content store loaded");
    }

    pub fn get(&self, allow_stale: bool) -> Option<ContentRecord> {
        self.get_at(allow_stale, Utc::now())
    }

    /// With `allow_stale == false`, nothing is returned once `now` is past
    /// `valid_until`; otherwise the latest record is returned, tagged stale.
    pub fn get_at(&self, allow_stale: bool, now: DateTime<Utc>) -> Option<ContentRecord> {
        let started = Instant::now();
        let record = self.state.read().current.as_ref().map(|r| r.tagged_at(now));

        let (outcome, result) = match record {
            Some(r) if !r.is_stale => (ReadOutcome::Fresh, Some(r)),
            Some(r) if allow_stale => (ReadOutcome::Stale, Some(r)),
            Some(_) => (ReadOutcome::Miss, None),
            None => (ReadOutcome::Miss, None),
        };
        self.stats.record_read(outcome, started.elapsed());
        result
    }

    /// Latest record without touching read statistics.
    pub fn peek(&self) -> Option<ContentRecord> {
        self.state.read().current.clone()
    }

    pub fn has_content(&self) -> bool {
        self.state.read().current.is_some()
    }

    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        match self.state.read().current.as_ref() {
            Some(r) if r.is_expired_at(now) => Freshness::Stale,
            Some(_) => Freshness::Fresh,
            None => Freshness::Absent,
        }
    }

    /// Make `record` current. The previous record moves to history unless it
    /// carries the same payload.
    pub fn put(&self, record: ContentRecord) {
        let _guard = self.write_lock.lock();
        let started = Instant::now();

        let mut record = record;
        record.is_stale = false;

        let (history, meta) = {
            let mut state = self.state.write();
            if let Some(previous) = state.current.take() {
                if previous.checksum != record.checksum || previous.content_day != record.content_day {
                    state.history.push_front(previous);
                    while state.history.len() > self.history_limit {
                        state.history.pop_back();
                    }
                }
            }
            state.meta.last_fetch_at = Some(record.fetched_at);
            state.meta.last_checksum = Some(record.checksum.clone());
            state.meta.schema_version = SCHEMA_VERSION;
            state.meta.write_count += 1;
            state.current = Some(record.clone());
            (
                state.history.iter().cloned().collect::<Vec<_>>(),
                state.meta.clone(),
            )
        };

        match self.persist(Some(&record), &history, &meta) {
            Ok(()) => {
                self.degraded.store(false, Ordering::SeqCst);
                debug!(content_id = %record.content_id, day = %record.content_day, "Record stored");
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist record, keeping in memory only");
                self.mark_degraded();
            }
        }
        self.stats.record_write(started.elapsed());
    }

    /// Mark the current record expired. It remains readable with `allow_stale`.
    pub fn invalidate(&self) {
        let _guard = self.write_lock.lock();
        let updated = {
            let mut state = self.state.write();
            match state.current.as_mut() {
                Some(record) => {
                    record.invalidated = true;
                    Some(record.clone())
                }
                None => None,
            }
        };
        self.stats.record_invalidation();

        if let Some(record) = updated {
            if let Err(e) = storage::save_json(self.backend.as_ref(), CURRENT_KEY, &record) {
                warn!(error = %e, "Failed to persist invalidation");
                self.mark_degraded();
            }
            info!(content_id = %record.content_id, "Current record invalidated");
        }
    }

    pub fn history(&self) -> Vec<ContentRecord> {
        self.state.read().history.iter().cloned().collect()
    }

    /// Re-verify the current record. An absent record passes.
    pub fn verify_integrity(&self) -> bool {
        let record = self.state.read().current.clone();
        match record {
            Some(r) => self.check_record(&r),
            None => true,
        }
    }

    /// Remove every record whose expiry is more than `retention` in the past.
    pub fn purge_expired(&self, now: DateTime<Utc>, retention: Duration) -> PurgeReport {
        let _guard = self.write_lock.lock();
        let mut report = PurgeReport::default();

        let (current, history, meta, changed) = {
            let mut state = self.state.write();
            let before = state.history.len();
            let mut freed = 0;
            state.history.retain(|r| {
                let keep = !r.is_past_retention(now, retention);
                if !keep {
                    freed += r.estimated_bytes();
                }
                keep
            });
            report.removed_records = before - state.history.len();
            report.freed_bytes = freed;

            let current_expired = state
                .current
                .as_ref()
                .is_some_and(|r| r.is_past_retention(now, retention));
            if current_expired {
                if let Some(r) = state.current.take() {
                    report.removed_records += 1;
                    report.freed_bytes += r.estimated_bytes();
                }
            }
            (
                state.current.clone(),
                state.history.iter().cloned().collect::<Vec<_>>(),
                state.meta.clone(),
                report.removed_records > 0,
            )
        };

        if changed {
            if let Err(e) = self.persist(current.as_ref(), &history, &meta) {
                warn!(error = %e, "Failed to persist purge");
                self.mark_degraded();
            }
            info!(removed = report.removed_records, "Expired records purged");
        }
        report
    }

    /// Keep only the `keep` most recent superseded records.
    pub fn evict_history(&self, keep: usize) -> PurgeReport {
        let _guard = self.write_lock.lock();
        let (current, history, meta, report) = {
            let mut state = self.state.write();
            let mut report = PurgeReport::default();
            while state.history.len() > keep {
                if let Some(r) = state.history.pop_back() {
                    report.removed_records += 1;
                    report.freed_bytes += r.estimated_bytes();
                }
            }
            state.history.shrink_to_fit();
            (
                state.current.clone(),
                state.history.iter().cloned().collect::<Vec<_>>(),
                state.meta.clone(),
                report,
            )
        };

        if report.removed_records > 0 {
            if let Err(e) = self.persist(current.as_ref(), &history, &meta) {
                warn!(error = %e, "Failed to persist history eviction");
                self.mark_degraded();
            }
        }
        report
    }

    pub fn estimated_bytes(&self) -> usize {
        let state = self.state.read();
        state.current.as_ref().map_or(0, |r| r.estimated_bytes())
            + state.history.iter().map(|r| r.estimated_bytes()).sum::<usize>()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// (checks, failures) across load-time and explicit integrity checks.
    pub fn integrity_counts(&self) -> (u64, u64) {
        (
            self.integrity_checks.load(Ordering::Relaxed),
            self.integrity_failures.load(Ordering::Relaxed),
        )
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ContentStoreStatus {
        let freshness = self.freshness_at(now);
        let (checks, failures) = self.integrity_counts();
        let resident_bytes = self.estimated_bytes();
        let state = self.state.read();
        let current = state.current.as_ref();
        ContentStoreStatus {
            backend: self.backend.backend_name(),
            freshness,
            content_id: current.map(|r| r.content_id.clone()),
            content_day: current.map(|r| r.content_day.clone()),
            fetched_at: current.map(|r| r.fetched_at),
            valid_until: current.map(|r| r.valid_until),
            age: current.map(|r| r.age_display(now)),
            history_len: state.history.len(),
            degraded: self.is_degraded(),
            resident_bytes,
            integrity_checks: checks,
            integrity_failures: failures,
            meta: state.meta.clone(),
        }
    }

    fn check_record(&self, record: &ContentRecord) -> bool {
        self.integrity_checks.fetch_add(1, Ordering::Relaxed);
        let ok = record.verify();
        if !ok {
            self.integrity_failures.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
        self.stats.record_persistence_failure();
    }

    fn persist(
        &self,
        current: Option<&ContentRecord>,
        history: &[ContentRecord],
        meta: &ContentMeta,
    ) -> Result<(), StorageError> {
        let backend = self.backend.as_ref();
        match current {
            Some(record) => storage::save_json(backend, CURRENT_KEY, record)?,
            None => backend.remove(CURRENT_KEY)?,
        }
        if history.is_empty() {
            backend.remove(HISTORY_KEY)?;
        } else {
            storage::save_json(backend, HISTORY_KEY, history)?;
        }
        storage::save_json(backend, META_KEY, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, Arc<StatisticsCollector>, ContentStore) {
        let backend = Arc::new(MemoryStore::new());
        let stats = Arc::new(StatisticsCollector::new(10));
        let store = ContentStore::new(backend.clone(), Arc::clone(&stats), 3);
        (backend, stats, store)
    }

    fn record(id: &str, fetched_at: DateTime<Utc>, valid_for: Duration) -> ContentRecord {
        ContentRecord::new(
            id,
            json!({"id": id, "body": "daily insight"}),
            None,
            fetched_at,
            valid_for,
            fetched_at + Duration::days(1),
            fetched_at.format("%Y-%m-%d").to_string(),
        )
    }

    #[test]
    fn test_put_then_get_returns_identical_payload() {
        let (_, stats, store) = setup();
        let now = Utc::now();
        let original = record("a", now, Duration::hours(6));
        store.put(original.clone());

        let loaded = store.get(false).expect("fresh record");
        assert_eq!(loaded.payload, original.payload);
        assert!(!loaded.is_stale);
        assert_eq!(stats.snapshot().writes, 1);
        assert_eq!(stats.snapshot().fresh_hits, 1);
    }

    #[test]
    fn test_expired_record_only_with_allow_stale() {
        let (_, _, store) = setup();
        let now = Utc::now();
        store.put(record("a", now - Duration::hours(2), Duration::hours(1)));

        assert!(store.get(false).is_none());
        let stale = store.get(true).expect("stale record");
        assert!(stale.is_stale);
    }

    #[test]
    fn test_put_supersedes_into_bounded_history() {
        let (_, _, store) = setup();
        let now = Utc::now();
        for i in 0..5 {
            store.put(record(&format!("r{}", i), now + Duration::seconds(i), Duration::hours(1)));
        }
        let history = store.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content_id, "r3");
        assert_eq!(store.peek().unwrap().content_id, "r4");
    }

    #[test]
    fn test_same_payload_does_not_grow_history() {
        let (_, _, store) = setup();
        let now = Utc::now();
        store.put(record("a", now, Duration::hours(1)));
        store.put(record("a", now + Duration::minutes(1), Duration::hours(1)));
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_load_restores_persisted_state() {
        let (backend, stats, store) = setup();
        let now = Utc::now();
        store.put(record("a", now, Duration::hours(1)));
        store.put(record("b", now, Duration::hours(1)));

        let reloaded = ContentStore::new(backend, stats, 3);
        reloaded.load();
        assert_eq!(reloaded.peek().unwrap().content_id, "b");
        assert_eq!(reloaded.history().len(), 1);
        assert_eq!(reloaded.status_at(now).meta.write_count, 2);
    }

    #[test]
    fn test_load_discards_corrupt_record() {
        let (backend, stats, _) = setup();
        let mut corrupt = record("bad", Utc::now(), Duration::hours(1));
        corrupt.payload = json!({"changed": true});
        storage::save_json(backend.as_ref(), CURRENT_KEY, &corrupt).unwrap();

        let store = ContentStore::new(backend.clone(), stats, 3);
        store.load();
        assert!(!store.has_content());
        assert_eq!(store.integrity_counts(), (1, 1));
        assert!(!backend.contains_key(CURRENT_KEY).unwrap());
    }

    #[test]
    fn test_persistence_failure_degrades_to_memory() {
        let (backend, stats, store) = setup();
        backend.set_failing(true);
        store.put(record("a", Utc::now(), Duration::hours(1)));

        assert!(store.is_degraded());
        assert!(store.get(false).is_some());
        assert_eq!(stats.persistence_failures(), 1);

        backend.set_failing(false);
        store.put(record("b", Utc::now(), Duration::hours(1)));
        assert!(!store.is_degraded());
    }

    #[test]
    fn test_invalidate_keeps_stale_fallback() {
        let (_, _, store) = setup();
        store.put(record("a", Utc::now(), Duration::hours(1)));
        store.invalidate();
        assert!(store.get(false).is_none());
        assert!(store.get(true).unwrap().is_stale);
        assert!(store.has_content());
    }

    #[test]
    fn test_purge_expired_is_idempotent() {
        let (backend, _, store) = setup();
        let now = Utc::now();
        store.put(record("old", now - Duration::days(10), Duration::hours(1)));
        store.put(record("new", now, Duration::hours(1)));

        let first = store.purge_expired(now, Duration::days(7));
        assert_eq!(first.removed_records, 1);
        assert!(first.freed_bytes > 0);
        let mut keys_after_first = backend.keys().unwrap();
        keys_after_first.sort();

        let second = store.purge_expired(now, Duration::days(7));
        assert_eq!(second, PurgeReport::default());
        let mut keys_after_second = backend.keys().unwrap();
        keys_after_second.sort();
        assert_eq!(keys_after_first, keys_after_second);
        assert_eq!(store.peek().unwrap().content_id, "new");
    }

    #[test]
    fn test_evict_history() {
        let (_, _, store) = setup();
        let now = Utc::now();
        for i in 0..4 {
            store.put(record(&format!("r{}", i), now, Duration::hours(1)));
        }
        let report = store.evict_history(1);
        assert_eq!(report.removed_records, 2);
        assert_eq!(store.history().len(), 1);
    }
}
