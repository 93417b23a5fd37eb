//! File-backed storage shared between processes
//!
//! Each key is one JSON file, `<dir>/<key>.json`. Writes land in a temp file
//! that is renamed over the target, so a reader sees either the old or the
//! new document and never a torn one. Writes made by other processes are
//! picked up by a polling watcher.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Storage, StorageChange, StorageError, CHANGE_CHANNEL_CAPACITY};

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct FileStorage {
    inner: Arc<FileInner>,
}

struct FileInner {
    dir: PathBuf,
    notifier: broadcast::Sender<StorageChange>,
    /// Last value this handle observed per key, used to detect outside writes
    seen: Mutex<HashMap<String, Option<Value>>>,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        let (notifier, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(FileInner {
                dir,
                notifier,
                seen: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// File holding `key`. Keys are restricted to a safe file-name alphabet.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.inner.dir.join(format!("{key}.json")))
    }

    /// Re-read `key` and notify subscribers if it changed since this handle
    /// last saw it. The first observation of a key only records it.
    ///
    /// Returns whether a change was emitted.
    pub async fn poll(&self, key: &str) -> Result<bool, StorageError> {
        let before = self.seen().get(key).cloned();
        let current = self.read(key).await?;
        Ok(self.observe(key, before, current))
    }

    /// Record `current` as read by a poll that started when `seen` held
    /// `before`. If this handle stored or read the key in the meantime, the
    /// read may predate that value and is dropped.
    fn observe(&self, key: &str, before: Option<Option<Value>>, current: Option<Value>) -> bool {
        let mut seen = self.seen();
        if seen.get(key) != before.as_ref() {
            debug!("'{}' changed while polling; dropping read", key);
            return false;
        }
        let old_value = match before {
            Some(previous) if previous == current => return false,
            Some(previous) => previous,
            None => {
                seen.insert(key.to_string(), current);
                return false;
            }
        };
        seen.insert(key.to_string(), current.clone());
        drop(seen);

        debug!("Detected outside write to '{}'", key);
        let _ = self.inner.notifier.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: current,
        });
        true
    }

    /// Poll `keys` every `interval` until the returned task is aborted.
    pub fn spawn_watcher(&self, keys: Vec<String>, interval: Duration) -> JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for key in &keys {
                    if let Err(e) = storage.poll(key).await {
                        warn!("Storage watcher failed to read '{}': {}", key, e);
                    }
                }
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn seen(&self) -> MutexGuard<'_, HashMap<String, Option<Value>>> {
        self.inner.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, key: &str, value: Option<Value>) {
        self.seen().insert(key.to_string(), value);
    }
}

impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let value = self.read(key).await?;
        self.remember(key, value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let old_value = match self.read(key).await {
            Ok(old_value) => old_value,
            Err(e) => {
                warn!("Overwriting unreadable value for '{}': {}", key, e);
                None
            }
        };

        let bytes = serde_json::to_vec_pretty(&value).map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .inner
            .dir
            .join(format!(".{key}.json.{}.{seq}.tmp", std::process::id()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: tmp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io { path, source });
        }

        self.remember(key, Some(value.clone()));
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
