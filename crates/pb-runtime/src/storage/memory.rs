//! In-process storage shared between execution contexts by cloning the handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;

use super::{Storage, StorageChange, StorageError, CHANGE_CHANNEL_CAPACITY};

#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    entries: Mutex<HashMap<String, Value>>,
    notifier: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                entries: Mutex::new(HashMap::new()),
                notifier,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let value = self.entries().get(key).cloned();
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let old_value = self.entries().insert(key.to_string(), value.clone());
        // No subscribers is not an error
        let _ = self.inner.notifier.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.notifier.subscribe()
    }
}
