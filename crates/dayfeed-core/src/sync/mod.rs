//! Background synchronization with the remote content source.
//!
//! ```text
//! Idle -> Syncing -> Success -> Idle
//!                 -> TransientFailure -> Backoff -> Syncing
//!                 -> PermanentFailure -> Idle
//! ```

pub mod service;
pub mod task;

pub use service::{load_persisted_task, ConnectivitySync, SyncStatus};
pub use task::{Backoff, SyncState, SyncTask, SyncTrigger, TASK_KEY};
