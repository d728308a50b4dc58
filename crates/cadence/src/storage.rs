//! Key-value storage collaborators (local and session storage).
//!
//! Values are stored as JSON. The engine never reads or writes storage
//! itself; handles are passed through to contexts unchanged.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;
use crate::sync::lock;

/// A JSON key-value store.
pub trait Storage: Send + Sync + 'static {
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Option<Value>;

    fn remove(&self, key: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

impl dyn Storage {
    /// Serialize `value` and store it under `key`.
    pub fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, value)
    }

    /// Load and deserialize the value under `key`, `None` if absent.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }
}

/// Process-local storage, used when the host does not provide one.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Value>>,
    max_entries: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that refuses new keys past `max_entries`.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::default(),
            max_entries: Some(max_entries),
        }
    }
}

impl Storage for MemoryStorage {
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        if let Some(max) = self.max_entries {
            if entries.len() >= max && !entries.contains_key(key) {
                return Err(StorageError::Full);
            }
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.entries).get(key).cloned()
    }

    fn remove(&self, key: &str) {
        lock(&self.entries).remove(key);
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    fn clear(&self) {
        lock(&self.entries).clear();
    }
}
