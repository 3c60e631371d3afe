//! Content-day boundaries in the user's timezone.
//!
//! A content day runs from local midnight to the next local midnight on the
//! zoned calendar, so days that contain a DST transition are 23 or 25 hours
//! long. Boundaries are never computed by adding a fixed 24h offset.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::warn;

/// How far past a missing local midnight to search for the first valid instant.
/// DST gaps are at most two hours in practice.
const GAP_SEARCH_MINUTES: i64 = 180;

/// Step used when searching forward through a DST gap.
const GAP_SEARCH_STEP_MINUTES: i64 = 15;

/// The instant local `date` begins in `tz`.
///
/// When local midnight falls inside a DST gap the first valid local time
/// after it is used; when it is ambiguous the earlier instant wins.
pub fn start_of_day<Z: TimeZone>(date: NaiveDate, tz: &Z) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let mut offset = GAP_SEARCH_STEP_MINUTES;
            while offset <= GAP_SEARCH_MINUTES {
                let candidate = midnight + Duration::minutes(offset);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt.with_timezone(&Utc);
                }
                offset += GAP_SEARCH_STEP_MINUTES;
            }
            // Unreachable for real zones; treat the wall clock as UTC.
            Utc.from_utc_datetime(&midnight)
        }
    }
}

/// The instant after which "today's content" (relative to `now`) becomes a new day.
pub fn day_boundary<Z: TimeZone>(now: DateTime<Utc>, tz: &Z) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    start_of_day(tomorrow, tz)
}

/// Whether two instants fall on the same local calendar day in `tz`.
pub fn is_same_content_day<Z: TimeZone>(a: DateTime<Utc>, b: DateTime<Utc>, tz: &Z) -> bool {
    a.with_timezone(tz).date_naive() == b.with_timezone(tz).date_naive()
}

#[derive(Debug, Clone, Serialize)]
pub struct TimezoneStatus {
    pub configured: String,
    pub resolved: String,
    pub fell_back_to_utc: bool,
    pub boundary_computations: u64,
}

/// Resolves content days for the configured user timezone.
pub struct TimezoneResolver {
    tz: Tz,
    configured: String,
    fell_back: bool,
    boundary_computations: AtomicU64,
}

impl TimezoneResolver {
    /// Resolve an IANA timezone name, falling back to UTC if it is unknown.
    pub fn new(name: &str) -> Self {
        let (tz, fell_back) = match name.parse::<Tz>() {
            Ok(tz) => (tz, false),
            Err(_) => {
                warn!(timezone = name, "Unknown timezone, falling back to UTC");
                (Tz::UTC, true)
            }
        };
        Self {
            tz,
            configured: name.to_string(),
            fell_back,
            boundary_computations: AtomicU64::new(0),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    pub fn day_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.boundary_computations.fetch_add(1, Ordering::Relaxed);
        day_boundary(now, &self.tz)
    }

    /// Start of the content day containing `now`.
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day(self.local_date(now), &self.tz)
    }

    pub fn is_same_content_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        is_same_content_day(a, b, &self.tz)
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        instant.with_timezone(&self.tz).time()
    }

    /// Date key sent to the remote source, e.g. `2024-03-10`.
    pub fn content_day_key(&self, now: DateTime<Utc>) -> String {
        self.local_date(now).format("%Y-%m-%d").to_string()
    }

    /// Instant `time` occurs on the content day containing `now`.
    pub fn at_local_time(&self, now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
        let local = self.local_date(now).and_time(time);
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| self.day_start(now))
    }

    pub fn status(&self) -> TimezoneStatus {
        TimezoneStatus {
            configured: self.configured.clone(),
            resolved: self.tz.name().to_string(),
            fell_back_to_utc: self.fell_back,
            boundary_computations: self.boundary_computations.load(Ordering::Relaxed),
        }
    }
}
