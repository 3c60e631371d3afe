use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{validate_key, KeyValueStore};
use crate::error::StorageError;

/// In-memory key-value store.
///
/// Can be switched into a failing mode to exercise the degrade-to-memory
/// paths of the services that sit on top of it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StorageError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn contains_key(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.entries.read().contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check()?;
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        assert!(!store.contains_key("a").unwrap());
        store.set_string("a", "1").unwrap();
        assert_eq!(store.get_string("a").unwrap().as_deref(), Some("1"));
        assert!(store.contains_key("a").unwrap());
        store.remove("a").unwrap();
        assert!(store.get_string("a").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failing_mode() {
        let store = MemoryStore::new();
        store.set_string("a", "1").unwrap();
        store.set_failing(true);
        assert!(store.get_string("a").is_err());
        assert!(store.set_string("b", "2").is_err());
        store.set_failing(false);
        assert_eq!(store.len(), 1);
    }
}
