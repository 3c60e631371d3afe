use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LatencyThresholds;

/// Operation classes with their own timing buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
    Lookup,
    Sync,
}

impl OperationClass {
    pub const ALL: [OperationClass; 4] = [
        OperationClass::Read,
        OperationClass::Write,
        OperationClass::Lookup,
        OperationClass::Sync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Lookup => "lookup",
            OperationClass::Sync => "sync",
        }
    }
}

/// Bounded ring buffer of timing samples in milliseconds.
#[derive(Debug, Clone)]
pub struct TimingBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl TimingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change capacity, dropping the oldest samples if needed.
    /// Returns the number of samples dropped.
    pub fn resize(&mut self, capacity: usize) -> usize {
        self.capacity = capacity.max(1);
        let mut dropped = 0;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            dropped += 1;
        }
        self.samples.shrink_to(self.capacity);
        dropped
    }

    pub fn summary(&self) -> Option<TimingSummary> {
        TimingSummary::from_samples(self.samples.iter().copied())
    }
}

/// Derived statistics over a set of timing samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub std_dev_ms: f64,
    pub p95_ms: f64,
}

impl TimingSummary {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.into_iter().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let p95_index = ((count as f64 * 0.95).ceil() as usize).clamp(1, count) - 1;

        Some(Self {
            count,
            mean_ms: mean,
            median_ms: median,
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            std_dev_ms: variance.sqrt(),
            p95_ms: sorted[p95_index],
        })
    }
}

/// Qualitative rating of a latency against fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl PerformanceRating {
    pub fn from_latency(ms: f64, thresholds: &LatencyThresholds) -> Self {
        if ms < thresholds.excellent_ms {
            PerformanceRating::Excellent
        } else if ms < thresholds.good_ms {
            PerformanceRating::Good
        } else if ms < thresholds.fair_ms {
            PerformanceRating::Fair
        } else {
            PerformanceRating::Poor
        }
    }

    /// Normalized score used by the health monitor.
    pub fn score(&self) -> f64 {
        match self {
            PerformanceRating::Excellent => 1.0,
            PerformanceRating::Good => 0.8,
            PerformanceRating::Fair => 0.5,
            PerformanceRating::Poor => 0.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceRating::Excellent => "excellent",
            PerformanceRating::Good => "good",
            PerformanceRating::Fair => "fair",
            PerformanceRating::Poor => "poor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buffer = TimingBuffer::new(3);
        for ms in [10, 20, 30, 40] {
            buffer.push(Duration::from_millis(ms));
        }
        assert_eq!(buffer.len(), 3);
        let summary = buffer.summary().unwrap();
        assert_eq!(summary.min_ms, 20.0);
        assert_eq!(summary.max_ms, 40.0);
    }

    #[test]
    fn test_summary_statistics() {
        let summary = TimingSummary::from_samples([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(summary.count, 8);
        assert_eq!(summary.mean_ms, 5.0);
        assert_eq!(summary.median_ms, 4.5);
        assert_eq!(summary.std_dev_ms, 2.0);
        assert_eq!(summary.p95_ms, 9.0);
    }

    #[test]
    fn test_summary_empty() {
        assert!(TimingSummary::from_samples(Vec::new()).is_none());
        assert!(TimingBuffer::new(5).summary().is_none());
    }

    #[test]
    fn test_resize_drops_oldest() {
        let mut buffer = TimingBuffer::new(10);
        for ms in 1..=10 {
            buffer.push(Duration::from_millis(ms));
        }
        assert_eq!(buffer.resize(4), 6);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.summary().unwrap().min_ms, 7.0);
        assert_eq!(buffer.resize(8), 0);
    }

    #[test]
    fn test_rating_thresholds() {
        let read = LatencyThresholds::new(50.0, 100.0, 200.0);
        assert_eq!(PerformanceRating::from_latency(49.9, &read), PerformanceRating::Excellent);
        assert_eq!(PerformanceRating::from_latency(50.0, &read), PerformanceRating::Good);
        assert_eq!(PerformanceRating::from_latency(150.0, &read), PerformanceRating::Fair);
        assert_eq!(PerformanceRating::from_latency(200.0, &read), PerformanceRating::Poor);
        assert!(PerformanceRating::Excellent > PerformanceRating::Poor);
    }
}
