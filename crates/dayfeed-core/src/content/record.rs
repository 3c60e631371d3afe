use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One fetched daily content item.
///
/// `valid_until` is fixed at construction: the freshness window after the
/// fetch, clamped to the next content-day boundary. `is_stale` is derived on
/// every read and never trusted from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_id: String,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub is_stale: bool,
    pub source_revision: Option<String>,
    /// Local date key (`YYYY-MM-DD`) of the content day the record belongs to.
    pub content_day: String,
    /// BLAKE3 hex digest of the canonical payload JSON.
    pub checksum: String,
    /// Set by an explicit invalidation; the record then reads as expired.
    #[serde(default)]
    pub invalidated: bool,
}

impl ContentRecord {
    pub fn new(
        content_id: impl Into<String>,
        payload: serde_json::Value,
        source_revision: Option<String>,
        fetched_at: DateTime<Utc>,
        freshness_window: Duration,
        day_boundary: DateTime<Utc>,
        content_day: impl Into<String>,
    ) -> Self {
        let valid_until = (fetched_at + freshness_window).min(day_boundary).max(fetched_at);
        let checksum = Self::compute_checksum(&payload);
        Self {
            content_id: content_id.into(),
            payload,
            fetched_at,
            valid_until,
            is_stale: false,
            source_revision,
            content_day: content_day.into(),
            checksum,
            invalidated: false,
        }
    }

    pub fn compute_checksum(payload: &serde_json::Value) -> String {
        // serde_json maps are ordered, so this serialization is canonical.
        let canonical = payload.to_string();
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }

    /// Checksum matches the payload and the time invariant holds.
    pub fn verify(&self) -> bool {
        self.fetched_at <= self.valid_until && Self::compute_checksum(&self.payload) == self.checksum
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.invalidated || now > self.valid_until
    }

    /// Copy with `is_stale` derived for `now`.
    pub fn tagged_at(&self, now: DateTime<Utc>) -> Self {
        let mut record = self.clone();
        record.is_stale = self.is_expired_at(now);
        record
    }

    /// Whether the record can be purged once `retention` has passed after expiry.
    pub fn is_past_retention(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.valid_until + retention < now
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    /// Rough resident size, used for memory-reclaim estimates.
    pub fn estimated_bytes(&self) -> usize {
        self.payload.to_string().len()
            + self.content_id.len()
            + self.checksum.len()
            + self.content_day.len()
            + self.source_revision.as_ref().map_or(0, |r| r.len())
            + std::mem::size_of::<Self>()
    }
}
