//! Local storage of the daily content record.
//!
//! This module provides the `ContentStore` which owns persistence of the
//! current `ContentRecord`, its validation metadata and a short history of
//! superseded records. A record is fresh until its `valid_until`, which is
//! never later than the next content-day boundary.

pub mod record;
pub mod store;

pub use record::ContentRecord;
pub use store::{ContentMeta, ContentStore, ContentStoreStatus, Freshness, PurgeReport};
