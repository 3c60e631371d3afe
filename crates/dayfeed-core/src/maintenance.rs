//! Scheduled cleanup of persisted state.
//!
//! A sweep purges records past the retention window, clears a sync task
//! left behind by a crashed process, drops a persisted metrics snapshot
//! that outlived retention, and trims timing buffers. Running it twice in a
//! row leaves the same state as running it once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::content::ContentStore;
use crate::error::StorageError;
use crate::health::HealthMonitor;
use crate::stats::collector::METRICS_SNAPSHOT_KEY;
use crate::stats::StatisticsCollector;
use crate::sync::{load_persisted_task, ConnectivitySync, TASK_KEY};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub swept_at: Option<DateTime<Utc>>,
    pub removed_records: usize,
    pub freed_bytes: usize,
    pub orphaned_tasks_cleared: usize,
    pub stale_snapshots_removed: usize,
    pub samples_dropped: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: f64,
}

impl SweepReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether the sweep changed anything.
    pub fn changed(&self) -> bool {
        self.removed_records > 0
            || self.orphaned_tasks_cleared > 0
            || self.stale_snapshots_removed > 0
            || self.samples_dropped > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceStatus {
    pub sweeps: u64,
    pub interval_secs: i64,
    pub retention_secs: i64,
    pub last_report: Option<SweepReport>,
}

pub struct MaintenanceService {
    store: Arc<ContentStore>,
    sync: Arc<ConnectivitySync>,
    stats: Arc<StatisticsCollector>,
    health: Arc<HealthMonitor>,
    interval: Duration,
    retention: Duration,
    sweep_lock: Mutex<()>,
    sweeps: AtomicU64,
    last_report: Mutex<Option<SweepReport>>,
}

impl MaintenanceService {
    pub fn new(
        store: Arc<ContentStore>,
        sync: Arc<ConnectivitySync>,
        stats: Arc<StatisticsCollector>,
        health: Arc<HealthMonitor>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            sync,
            stats,
            health,
            interval: config.maintenance_interval,
            retention: config.retention_window,
            sweep_lock: Mutex::new(()),
            sweeps: AtomicU64::new(0),
            last_report: Mutex::new(None),
        }
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let _guard = self.sweep_lock.lock();
        let started = Instant::now();
        let mut report = SweepReport {
            swept_at: Some(now),
            ..Default::default()
        };

        let purge = self.store.purge_expired(now, self.retention);
        report.removed_records = purge.removed_records;
        report.freed_bytes = purge.freed_bytes;

        self.clear_orphaned_task(&mut report);
        self.remove_stale_snapshot(now, &mut report);
        report.samples_dropped = self.stats.compact(self.stats.sample_capacity());

        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.health.record_sweep(now, report.is_ok());

        if report.changed() {
            info!(
                removed = report.removed_records,
                freed_bytes = report.freed_bytes,
                orphans = report.orphaned_tasks_cleared,
                snapshots = report.stale_snapshots_removed,
                "Maintenance sweep complete"
            );
        } else {
            debug!("Maintenance sweep found nothing to do");
        }
        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// A persisted task with nothing in flight was left by a dead process.
    fn clear_orphaned_task(&self, report: &mut SweepReport) {
        if self.sync.is_busy() {
            return;
        }
        let backend = self.store.backend();
        match backend.contains_key(TASK_KEY) {
            Ok(true) => {
                if let Some(task) = load_persisted_task(backend.as_ref()) {
                    debug!(task_id = %task.task_id, attempt = task.attempt, "Clearing orphaned sync task");
                }
                match backend.remove(TASK_KEY) {
                    Ok(()) => report.orphaned_tasks_cleared += 1,
                    Err(e) => report.errors.push(format!("orphaned task: {}", e)),
                }
            }
            Ok(false) => {}
            Err(e) => report.errors.push(format!("orphaned task: {}", e)),
        }
    }

    fn remove_stale_snapshot(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let backend = self.store.backend();
        let stale = match StatisticsCollector::load_persisted(backend.as_ref()) {
            Ok(Some(persisted)) => persisted.saved_at + self.retention < now,
            Ok(None) => false,
            Err(StorageError::Serialization(e)) => {
                warn!(error = %e, "Unreadable metrics snapshot, removing");
                true
            }
            Err(e) => {
                report.errors.push(format!("metrics snapshot: {}", e));
                false
            }
        };
        if stale {
            match backend.remove(METRICS_SNAPSHOT_KEY) {
                Ok(()) => report.stale_snapshots_removed += 1,
                Err(e) => report.errors.push(format!("metrics snapshot: {}", e)),
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().clone()
    }

    pub fn status(&self) -> MaintenanceStatus {
        MaintenanceStatus {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            interval_secs: self.interval.num_seconds(),
            retention_secs: self.retention.num_seconds(),
            last_report: self.last_report(),
        }
    }
}
