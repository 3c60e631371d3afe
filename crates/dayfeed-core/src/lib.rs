//! dayfeed core - offline cache and background sync for daily content.
//!
//! The engine keeps one freshness-bounded content record available offline,
//! refreshes it when connectivity allows, and adapts its own tuning to the
//! device it runs on. Applications talk to it through [`Coordinator`].

pub mod compat;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod maintenance;
pub mod metrics;
pub mod services;
pub mod source;
pub mod stats;
pub mod storage;
pub mod strategy;
pub mod sync;
pub mod timezone;
pub mod warming;

pub use config::{CacheConfig, Environment};
pub use content::ContentRecord;
pub use coordinator::Coordinator;
pub use error::{ConfigError, SourceError, StorageError, SyncError};
pub use health::{HealthSnapshot, HealthStatus};
pub use lifecycle::{InitReport, ShutdownReport};
pub use metrics::MetricsReport;
pub use source::{ContentSource, HttpContentSource, RemoteContent};
pub use stats::InteractionKind;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use strategy::{DeviceHints, OptimizationContext, OptimizationTrigger};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
