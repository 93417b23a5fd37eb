//! Persistence bridge between the rule tree and shared storage
//!
//! The tree lives as one document under a single key. Writers always store
//! the whole tree; there is no delta, version token or compare-and-swap, so
//! concurrent writers resolve as last-write-wins.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use pb_core::document::{decode_value, encode_value, DocumentError, STORAGE_KEY};
use pb_core::{RuleTree, TreeCache};

use crate::storage::{Storage, StorageChange, StorageError};

/// Error type for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
    #[error("No rule tree stored under '{0}'")]
    Missing(String),
}

/// A decoded change to the stored tree.
#[derive(Debug)]
pub enum TreeUpdate {
    /// The document was replaced with a valid tree
    Replaced(RuleTree),
    /// The document was removed
    Removed,
    /// The document was replaced with something that does not decode
    Invalid(DocumentError),
    /// Notifications were dropped; the subscriber must re-read
    Lagged(u64),
}

/// Change notifications for the tree document only.
pub struct TreeSubscription {
    receiver: broadcast::Receiver<StorageChange>,
    key: String,
}

impl TreeSubscription {
    /// Wait for the next change to the tree document.
    ///
    /// Returns `None` once the storage has been dropped.
    pub async fn next(&mut self) -> Option<TreeUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.key != self.key => continue,
                Ok(change) => {
                    return Some(match change.new_value {
                        None => TreeUpdate::Removed,
                        Some(value) => match decode_value(value) {
                            Ok(tree) => TreeUpdate::Replaced(tree),
                            Err(e) => TreeUpdate::Invalid(e),
                        },
                    })
                }
                Err(RecvError::Lagged(skipped)) => return Some(TreeUpdate::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Clone)]
pub struct PersistenceBridge<S> {
    storage: S,
    key: String,
}

impl<S: Storage> PersistenceBridge<S> {
    /// Bridge over the default `blockedPages` key.
    pub fn new(storage: S) -> Self {
        Self::with_key(storage, STORAGE_KEY)
    }

    pub fn with_key(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Create the empty root document if none exists yet.
    ///
    /// Returns whether a document was created.
    pub async fn install(&self, root_name: &str) -> Result<bool, BridgeError> {
        if self.storage.get(&self.key).await?.is_some() {
            debug!("Rule tree already present under '{}'", self.key);
            return Ok(false);
        }
        self.save(&RuleTree::new(root_name)).await?;
        info!("Installed empty rule tree '{}' under '{}'", root_name, self.key);
        Ok(true)
    }

    /// Read and decode the stored tree.
    pub async fn load(&self) -> Result<RuleTree, BridgeError> {
        let value = self.storage.get(&self.key).await.map_err(|e| {
            error!("Failed to read rule tree: {}", e);
            e
        })?;
        let value = value.ok_or_else(|| BridgeError::Missing(self.key.clone()))?;
        Ok(decode_value(value)?)
    }

    /// Like `load`, but an absent document yields an empty default tree.
    pub async fn load_or_default(&self) -> Result<RuleTree, BridgeError> {
        match self.load().await {
            Err(BridgeError::Missing(_)) => Ok(RuleTree::default()),
            other => other,
        }
    }

    /// Persist the whole tree, replacing whatever is stored.
    pub async fn save(&self, tree: &RuleTree) -> Result<(), BridgeError> {
        let value = encode_value(tree)?;
        self.storage.set(&self.key, value).await.map_err(|e| {
            error!("Failed to persist rule tree: {}", e);
            e
        })?;
        debug!("Persisted rule tree ({} rules)", tree.rule_count());
        Ok(())
    }

    pub fn subscribe(&self) -> TreeSubscription {
        TreeSubscription {
            receiver: self.storage.subscribe(),
            key: self.key.clone(),
        }
    }

    /// Seed a cache from storage and keep it fresh.
    ///
    /// Subscribes before the initial read so no write can slip between the
    /// two. The returned task runs until the storage is dropped or the task
    /// is aborted.
    pub async fn attach(&self) -> Result<(Arc<TreeCache>, JoinHandle<()>), BridgeError> {
        let subscription = self.subscribe();
        let cache = Arc::new(TreeCache::new(self.load_or_default().await?));
        let task = self.spawn_cache_sync(subscription, Arc::clone(&cache));
        Ok((cache, task))
    }

    fn spawn_cache_sync(&self, mut subscription: TreeSubscription, cache: Arc<TreeCache>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(update) = subscription.next().await {
                match update {
                    TreeUpdate::Replaced(tree) => cache.refresh(tree),
                    TreeUpdate::Removed => {
                        warn!("Rule tree document removed; falling back to an empty tree");
                        cache.refresh(RuleTree::default());
                    }
                    TreeUpdate::Invalid(e) => {
                        error!("Ignoring invalid rule tree update, keeping cached tree: {}", e);
                    }
                    TreeUpdate::Lagged(skipped) => {
                        warn!("Missed {} storage notifications; re-reading rule tree", skipped);
                        match bridge.load().await {
                            Ok(tree) => cache.refresh(tree),
                            Err(e) => error!("Failed to re-read rule tree: {}", e),
                        }
                    }
                }
            }
            debug!("Storage closed; cache sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::MemoryStorage;
    use pb_core::Node;
    use serde_json::json;

    async fn wait_for_generation(cache: &TreeCache, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.generation() < generation {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("cache refresh");
    }

    #[tokio::test]
    async fn test_install_only_once() {
        let bridge = PersistenceBridge::new(MemoryStorage::new());
        assert!(bridge.install("All pages").await.unwrap());
        assert!(!bridge.install("Other").await.unwrap());
        assert_eq!(bridge.load().await.unwrap().name(), "All pages");
    }

    #[tokio::test]
    async fn test_load_missing() {
        let bridge = PersistenceBridge::new(MemoryStorage::new());
        assert!(matches!(bridge.load().await, Err(BridgeError::Missing(_))));
        assert_eq!(bridge.load_or_default().await.unwrap(), RuleTree::default());
    }

    #[tokio::test]
    async fn test_save_writes_whole_document() {
        let storage = MemoryStorage::new();
        let bridge = PersistenceBridge::new(storage.clone());
        let mut tree = RuleTree::default();
        tree.upsert_node_from_pathname(&["ads"], Node::url_rule("ads.example.com").with_name("ads"))
            .unwrap();
        bridge.save(&tree).await.unwrap();

        let stored = storage.get(STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(stored["schemaVersion"], 2);
        assert_eq!(stored["root"]["children"][0]["url"], "ads.example.com");
        assert_eq!(bridge.load().await.unwrap(), tree);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let storage = MemoryStorage::new();
        let bridge_a = PersistenceBridge::new(storage.clone());
        let bridge_b = PersistenceBridge::new(storage.clone());
        bridge_a.install("root").await.unwrap();

        // Both writers start from the same stored tree
        let mut tree_a = bridge_a.load().await.unwrap();
        let mut tree_b = bridge_b.load().await.unwrap();
        tree_a.upsert_node_from_pathname(&["a.com"], Node::url_rule("a.com")).unwrap();
        tree_b.upsert_node_from_pathname(&["b.com"], Node::url_rule("b.com")).unwrap();

        bridge_a.save(&tree_a).await.unwrap();
        bridge_b.save(&tree_b).await.unwrap();

        let stored = bridge_a.load().await.unwrap();
        assert_eq!(stored, tree_b);
        assert!(stored.get_node_from_pathname(&["a.com"]).is_err());
    }

    #[tokio::test]
    async fn test_attach_follows_writes_from_other_context() {
        let storage = MemoryStorage::new();
        let monitor_bridge = PersistenceBridge::new(storage.clone());
        let editor_bridge = PersistenceBridge::new(storage.clone());
        editor_bridge.install("root").await.unwrap();

        let (cache, task) = monitor_bridge.attach().await.unwrap();
        assert_eq!(cache.snapshot().rule_count(), 0);

        let mut tree = editor_bridge.load().await.unwrap();
        tree.upsert_node_from_pathname(&["fb"], Node::url_rule("facebook.com").with_name("fb"))
            .unwrap();
        editor_bridge.save(&tree).await.unwrap();

        wait_for_generation(&cache, 1).await;
        assert_eq!(*cache.snapshot(), tree);
        task.abort();
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_cache() {
        let storage = MemoryStorage::new();
        let bridge = PersistenceBridge::new(storage.clone());
        let mut tree = RuleTree::default();
        tree.upsert_node_from_pathname(&["a.com"], Node::url_rule("a.com")).unwrap();
        bridge.save(&tree).await.unwrap();

        let (cache, task) = bridge.attach().await.unwrap();
        storage.set(STORAGE_KEY, json!({ "schemaVersion": 2, "root": { "type": "Group" } }))
            .await
            .unwrap();
        let mut replacement = RuleTree::default();
        replacement.upsert_node_from_pathname(&["b.com"], Node::url_rule("b.com")).unwrap();
        bridge.save(&replacement).await.unwrap();

        // Only the valid write refreshes the cache
        wait_for_generation(&cache, 1).await;
        assert_eq!(cache.generation(), 1);
        assert_eq!(*cache.snapshot(), replacement);
        task.abort();
    }

    #[tokio::test]
    async fn test_subscription_filters_other_keys() {
        let storage = MemoryStorage::new();
        let bridge = PersistenceBridge::new(storage.clone());
        let mut subscription = bridge.subscribe();

        storage.set("settings", json!({ "theme": "dark" })).await.unwrap();
        bridge.save(&RuleTree::new("root")).await.unwrap();

        match subscription.next().await {
            Some(TreeUpdate::Replaced(tree)) => assert_eq!(tree.name(), "root"),
            other => panic!("unexpected update: {other:?}"),
        }
    }
}
