//! Operation statistics and performance analysis.
//!
//! - `StatisticsCollector`: counters plus bounded timing buffers per
//!   operation class (read/write/lookup/sync)
//! - `PerformanceMonitor`: derived ratings, recommendations and a synthetic
//!   benchmark

pub mod collector;
pub mod performance;
pub mod timing;

pub use collector::{InteractionKind, ReadOutcome, StatisticsCollector, StatisticsSnapshot};
pub use performance::{BenchmarkReport, PerformanceAnalysis, PerformanceMonitor};
pub use timing::{OperationClass, PerformanceRating, TimingBuffer, TimingSummary};
