//! Key-value storage backends.
//!
//! The engine persists everything through the small [`KeyValueStore`]
//! interface so it can run against any conforming backend:
//! - `MemoryStore`: process-local map, used in tests and as a scratch area
//! - `FileStore`: one JSON file per key in a cache directory

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

/// Generic string key-value storage.
///
/// Implementations must make `set_string` atomic with respect to readers:
/// a reader sees either the previous value or the new one, never a partial
/// write.
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn contains_key(&self, key: &str) -> Result<bool, StorageError>;

    /// All keys currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Short backend name for diagnostics.
    fn backend_name(&self) -> &'static str;
}

/// Load a JSON value stored under `key`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get_string(key)? {
        Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        None => Ok(None),
    }
}

/// Store a value as JSON under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let contents = serde_json::to_string(value)?;
    store.set_string(key, &contents)
}

/// Keys are restricted so every backend can map them to file names safely.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("content.current").is_ok());
        assert!(validate_key("sync_task-1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("with space").is_err());
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        save_json(&store, "numbers", &vec![1, 2, 3]).expect("save");
        let loaded: Option<Vec<i32>> = load_json(&store, "numbers").expect("load");
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let missing: Option<Vec<i32>> = load_json(&store, "absent").expect("load");
        assert!(missing.is_none());
    }
}
