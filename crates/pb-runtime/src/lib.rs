//! PageBlocker Runtime
//!
//! The execution contexts around the core rule tree: a shared single-document
//! store with change notification, the background monitor that redirects
//! blocked navigations, and the editor that mutates and persists the tree.
//!
//! # Consistency
//!
//! Writers always persist the entire tree. There is no version token and no
//! compare-and-swap: two writers racing produce last-write-wins. Every
//! context keeps a local cache that is replaced wholesale on each change
//! notification, so a monitor may act on a slightly stale tree until the
//! notification for a write arrives.

pub mod bridge;
pub mod config;
pub mod editor;
pub mod monitor;
pub mod storage;

pub use bridge::{BridgeError, PersistenceBridge, TreeSubscription, TreeUpdate};
pub use config::{Config, ConfigError};
pub use editor::{Editor, EditorError, NodeDraft};
pub use monitor::{
    BackgroundMonitor, Clock, FixedClock, MonitorSettings, NavigationEvent, Redirect, SystemClock, TabController,
    TabError, TabId, DEFAULT_REDIRECT_TARGET,
};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageChange, StorageError};
