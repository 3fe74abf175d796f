use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, StoreError};

/// Key-value persistence scoped to the current device.
///
/// Implementations must be safe to share between sessions in the same
/// process; several processes may also point at the same backing file.
pub trait DeviceStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: String) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    store: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        let mut map = self.store.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut map))
    }
}

impl DeviceStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_map(|map| map.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        self.with_map(|map| {
            map.insert(key.to_string(), value);
        })
    }

    fn del(&self, key: &str) -> Result<()> {
        self.with_map(|map| {
            map.remove(key);
        })
    }
}
