use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use super::collector::StatisticsCollector;
use super::timing::{OperationClass, PerformanceRating, TimingSummary};
use crate::config::{CacheConfig, LatencyThresholds};
use crate::error::StorageError;
use crate::storage::{KeyValueStore, MemoryStore};

/// Number of read/write/lookup cycles in one benchmark run.
const BENCHMARK_CYCLES: usize = 25;

/// Size of the synthetic payload written per cycle.
const BENCHMARK_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct ClassPerformance {
    pub class: OperationClass,
    pub summary: TimingSummary,
    pub rating: PerformanceRating,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceAnalysis {
    pub classes: Vec<ClassPerformance>,
    pub overall_rating: Option<PerformanceRating>,
    /// Mean rating score in [0, 1]; 1.0 when nothing has been measured.
    pub score: f64,
    pub recommendations: Vec<String>,
}

impl PerformanceAnalysis {
    pub fn has_issue(&self) -> bool {
        self.classes
            .iter()
            .any(|c| c.rating <= PerformanceRating::Fair)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub cycles: usize,
    pub payload_bytes: usize,
    pub raw_timings_ms: BTreeMap<OperationClass, Vec<f64>>,
    pub summaries: BTreeMap<OperationClass, TimingSummary>,
    pub ratings: BTreeMap<OperationClass, PerformanceRating>,
    pub recommendations: Vec<String>,
}

/// Turns raw timing samples into ratings and recommendations.
pub struct PerformanceMonitor {
    stats: Arc<StatisticsCollector>,
    read: LatencyThresholds,
    write: LatencyThresholds,
    lookup: LatencyThresholds,
}

impl PerformanceMonitor {
    pub fn new(stats: Arc<StatisticsCollector>, config: &CacheConfig) -> Self {
        Self {
            stats,
            read: config.read_thresholds,
            write: config.write_thresholds,
            lookup: config.lookup_thresholds,
        }
    }

    pub fn thresholds(&self, class: OperationClass) -> LatencyThresholds {
        match class {
            OperationClass::Read => self.read,
            OperationClass::Write => self.write,
            // Sync latency is dominated by the network; rate it on the
            // write scale scaled up by an order of magnitude.
            OperationClass::Sync => LatencyThresholds::new(
                self.write.excellent_ms * 10.0,
                self.write.good_ms * 10.0,
                self.write.fair_ms * 10.0,
            ),
            OperationClass::Lookup => self.lookup,
        }
    }

    pub fn rate(&self, class: OperationClass, summary: &TimingSummary) -> PerformanceRating {
        PerformanceRating::from_latency(summary.mean_ms, &self.thresholds(class))
    }

    pub fn analyze(&self) -> PerformanceAnalysis {
        let classes: Vec<ClassPerformance> = OperationClass::ALL
            .iter()
            .filter_map(|class| {
                self.stats.summary(*class).map(|summary| ClassPerformance {
                    class: *class,
                    rating: self.rate(*class, &summary),
                    summary,
                })
            })
            .collect();

        let overall_rating = classes.iter().map(|c| c.rating).min();
        let score = if classes.is_empty() {
            1.0
        } else {
            classes.iter().map(|c| c.rating.score()).sum::<f64>() / classes.len() as f64
        };

        let ratings: BTreeMap<OperationClass, PerformanceRating> =
            classes.iter().map(|c| (c.class, c.rating)).collect();
        let summaries: BTreeMap<OperationClass, TimingSummary> =
            classes.iter().map(|c| (c.class, c.summary)).collect();
        let recommendations = recommendations_for(&ratings, &summaries);

        PerformanceAnalysis {
            classes,
            overall_rating,
            score,
            recommendations,
        }
    }

    /// Run a synthetic read + write + lookup cycle against a scratch store.
    pub fn benchmark(&self) -> Result<BenchmarkReport, StorageError> {
        self.benchmark_on(&MemoryStore::new())
    }

    pub fn benchmark_on(&self, store: &dyn KeyValueStore) -> Result<BenchmarkReport, StorageError> {
        let mut rng = rand::thread_rng();
        let mut raw: BTreeMap<OperationClass, Vec<f64>> = BTreeMap::new();

        for cycle in 0..BENCHMARK_CYCLES {
            let key = format!("benchmark.{}", cycle);
            let payload: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(BENCHMARK_PAYLOAD_BYTES)
                .map(char::from)
                .collect();

            let started = Instant::now();
            store.set_string(&key, &payload)?;
            push_ms(&mut raw, OperationClass::Write, started.elapsed());

            let started = Instant::now();
            let read_back = store.get_string(&key)?;
            push_ms(&mut raw, OperationClass::Read, started.elapsed());
            if read_back.as_deref() != Some(payload.as_str()) {
                return Err(StorageError::Corrupt { key });
            }

            let started = Instant::now();
            store.contains_key(&key)?;
            push_ms(&mut raw, OperationClass::Lookup, started.elapsed());

            store.remove(&key)?;
        }

        let summaries: BTreeMap<OperationClass, TimingSummary> = raw
            .iter()
            .filter_map(|(class, samples)| {
                TimingSummary::from_samples(samples.iter().copied()).map(|s| (*class, s))
            })
            .collect();
        let ratings: BTreeMap<OperationClass, PerformanceRating> = summaries
            .iter()
            .map(|(class, summary)| (*class, self.rate(*class, summary)))
            .collect();
        let recommendations = recommendations_for(&ratings, &summaries);

        debug!(
            backend = store.backend_name(),
            cycles = BENCHMARK_CYCLES,
            "Benchmark complete"
        );

        Ok(BenchmarkReport {
            cycles: BENCHMARK_CYCLES,
            payload_bytes: BENCHMARK_PAYLOAD_BYTES,
            raw_timings_ms: raw,
            summaries,
            ratings,
            recommendations,
        })
    }
}

fn push_ms(raw: &mut BTreeMap<OperationClass, Vec<f64>>, class: OperationClass, elapsed: Duration) {
    raw.entry(class)
        .or_default()
        .push(elapsed.as_secs_f64() * 1000.0);
}

fn recommendations_for(
    ratings: &BTreeMap<OperationClass, PerformanceRating>,
    summaries: &BTreeMap<OperationClass, TimingSummary>,
) -> Vec<String> {
    let mut out = Vec::new();

    for (class, rating) in ratings {
        match (class, rating) {
            (OperationClass::Read, PerformanceRating::Poor | PerformanceRating::Fair) => out.push(
                "Read latency is high: keep the current record resident in memory".to_string(),
            ),
            (OperationClass::Write, PerformanceRating::Poor | PerformanceRating::Fair) => out.push(
                "Write latency is high: check storage backend health or reduce payload size"
                    .to_string(),
            ),
            (OperationClass::Lookup, PerformanceRating::Poor | PerformanceRating::Fair) => {
                out.push("Key lookups are slow: compact stored metrics and history".to_string())
            }
            (OperationClass::Sync, PerformanceRating::Poor) => out.push(
                "Sync requests are slow: lower the fetch timeout or warm content earlier"
                    .to_string(),
            ),
            _ => {}
        }
    }

    for (class, summary) in summaries {
        if summary.count >= 5 && summary.std_dev_ms > summary.mean_ms {
            out.push(format!(
                "{} timings are highly variable (std dev {:.1}ms over mean {:.1}ms)",
                class.as_str(),
                summary.std_dev_ms,
                summary.mean_ms
            ));
        }
    }

    if out.is_empty() && !ratings.is_empty() {
        out.push("Performance is within targets".to_string());
    }
    out
}
