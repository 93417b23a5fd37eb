//! Shared key-value storage with change notification
//!
//! Reads and writes are atomic per key. A read-modify-write is not: callers
//! that read, edit and write back race with every other writer.
//!
//! Change notifications fire for every write, whichever context made it, and
//! are delivered at least once. A writer may or may not see its own write
//! echoed back; listeners must tolerate both.

use std::future::Future;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::broadcast;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Buffered notifications per subscriber before it starts lagging.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A single key changed value.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    /// `None` when the key was removed
    pub new_value: Option<Value>,
}

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Stored value for '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),
}

/// Shared document storage.
///
/// Implementations are cheap handles: cloning one yields another view of the
/// same store.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StorageError>> + Send;

    /// Replace the value stored under `key` and notify subscribers.
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Subscribe to change notifications for every key.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}
