//! Error types shared across the engine.
//!
//! [`ConfigError`] is fatal at startup and [`SyncError`] is what an explicit
//! refresh reports. Storage and source errors are recovered locally: storage
//! failures degrade to in-memory state, source failures feed the sync
//! backoff state machine.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Negative duration for {key}: {seconds}s")]
    NegativeDuration { key: &'static str, seconds: i64 },

    #[error("{key} must be greater than zero")]
    ZeroValue { key: &'static str },

    #[error("Thresholds out of order for {key}: {detail}")]
    Unordered { key: &'static str, detail: String },

    #[error("Failed to read config overrides: {0}")]
    Overrides(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Checksum mismatch for {key}")]
    Corrupt { key: String },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Offline - no connectivity")]
    Offline,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("No content published for {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl SourceError {
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 | 403 => SourceError::Unauthorized,
            404 => SourceError::NotFound(truncated),
            408 => SourceError::Network(format!("Status 408: {}", truncated)),
            429 => SourceError::RateLimited,
            500..=599 => SourceError::ServerError(truncated),
            _ => SourceError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether the sync state machine should retry this failure with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_)
                | SourceError::Network(_)
                | SourceError::Offline
                | SourceError::RateLimited
                | SourceError::ServerError(_)
        )
    }
}

/// Why a sync request did not produce a record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("A sync is already in flight")]
    InFlight,

    #[error("Backing off until {0}")]
    BackingOff(DateTime<Utc>),

    #[error("Sync cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(0)
        } else if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(SourceError::from_status(401, ""), SourceError::Unauthorized);
        assert_eq!(SourceError::from_status(429, ""), SourceError::RateLimited);
        assert!(SourceError::from_status(503, "down").is_transient());
        assert!(!SourceError::from_status(404, "none").is_transient());
        assert!(!SourceError::from_status(418, "teapot").is_transient());
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        match SourceError::from_status(500, &body) {
            SourceError::ServerError(msg) => {
                assert!(msg.contains("truncated"));
                assert!(msg.len() < body.len() + 40);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transient_variants() {
        assert!(SourceError::Timeout(10).is_transient());
        assert!(SourceError::Offline.is_transient());
        assert!(!SourceError::Unauthorized.is_transient());
        assert!(!SourceError::InvalidResponse("bad".into()).is_transient());
    }
}
