//! Editing surface for the rule tree
//!
//! Every edit is clone-then-replace: the current tree is copied, the copy is
//! mutated through the pathname operations, and only a successful mutation
//! replaces the canonical tree, which is then persisted whole.
//!
//! A failed mutation leaves the tree untouched. A failed save leaves the
//! edit applied in memory and the editor dirty; nothing is retried until the
//! caller asks for it with `save`.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use pb_core::document::RawNode;
use pb_core::{Node, NodeKind, RuleTree, TreeError};

use crate::bridge::{BridgeError, PersistenceBridge, TreeSubscription, TreeUpdate};
use crate::storage::Storage;

/// Error type for editor operations.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("Unknown rule type `{0}`")]
    UnknownKind(String),
    #[error("Refusing to save while rules of unknown type remain at: {}", format_paths(.0))]
    UnknownNodes(Vec<Vec<String>>),
    #[error("`{0}` is not a group")]
    NotAGroup(String),
    #[error("Failed to save rule tree: {0}")]
    Save(#[from] BridgeError),
}

fn format_paths(paths: &[Vec<String>]) -> String {
    paths
        .iter()
        .map(|path| path.join("/"))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Node Draft
// =============================================================================

/// Form data for creating or editing a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDraft {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub word: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl NodeDraft {
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Group.code().to_string(),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::UrlRule.code().to_string(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn word(word: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::WordRule.code().to_string(),
            word: Some(word.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn between(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Validate the draft into a node. Groups come out empty.
    pub fn into_node(self) -> Result<Node, EditorError> {
        if NodeKind::from_code(&self.kind).is_none() {
            return Err(EditorError::UnknownKind(self.kind));
        }
        let raw = RawNode {
            kind: self.kind,
            name: self.name,
            url: self.url,
            word: self.word,
            start_time: self.start_time,
            end_time: self.end_time,
            ..RawNode::default()
        };
        Ok(Node::try_from(raw)?)
    }
}

impl From<&Node> for NodeDraft {
    /// Prefill a draft from an existing node, for editing.
    fn from(node: &Node) -> Self {
        let raw = RawNode::from(node);
        Self {
            kind: raw.kind,
            name: raw.name,
            url: raw.url,
            word: raw.word,
            start_time: raw.start_time,
            end_time: raw.end_time,
        }
    }
}

// =============================================================================
// Editor
// =============================================================================

pub struct Editor<S> {
    bridge: PersistenceBridge<S>,
    tree: RuleTree,
    path: Vec<String>,
    dirty: bool,
}

impl<S: Storage> Editor<S> {
    /// Open the editor on the stored tree (or an empty one if none exists).
    pub async fn open(bridge: PersistenceBridge<S>) -> Result<Self, EditorError> {
        let tree = bridge.load_or_default().await?;
        Ok(Self {
            bridge,
            tree,
            path: Vec::new(),
            dirty: false,
        })
    }

    pub fn tree(&self) -> &RuleTree {
        &self.tree
    }

    /// Pathname of the group currently viewed.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// True when the in-memory tree has edits that were not persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn subscribe(&self) -> TreeSubscription {
        self.bridge.subscribe()
    }

    /// The group currently viewed.
    pub fn current_node(&self) -> Result<&Node, EditorError> {
        Ok(self.tree.get_node_from_pathname(&self.path)?)
    }

    /// `root/a/b` rendering of the current path.
    pub fn breadcrumb(&self) -> String {
        std::iter::once(self.tree.name())
            .chain(self.path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("/")
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    /// Navigate into the child group `key`.
    pub fn enter(&mut self, key: &str) -> Result<(), EditorError> {
        let child = self.current_node()?.get_node(key)?;
        if !child.is_group() {
            return Err(EditorError::NotAGroup(key.to_string()));
        }
        self.path.push(key.to_string());
        Ok(())
    }

    /// Navigate to the parent group. Returns false at the root.
    pub fn go_back(&mut self) -> bool {
        self.path.pop().is_some()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Add a node under the current group, or replace the sibling with the
    /// same key. Returns the new node's pathname.
    pub async fn add(&mut self, draft: NodeDraft) -> Result<Vec<String>, EditorError> {
        let node = draft.into_node()?;
        let mut target = self.path.clone();
        target.push(node.key().to_string());
        let pathname = target.clone();
        self.commit(move |tree| tree.upsert_node_from_pathname(&target, node)).await?;
        Ok(pathname)
    }

    /// Replace the node at `path` in place. A group keeps its children.
    /// Returns the node's pathname after the edit (it changes on rename).
    pub async fn edit(&mut self, path: &[String], draft: NodeDraft) -> Result<Vec<String>, EditorError> {
        let mut node = draft.into_node()?;
        if let (Node::Group(new_group), Node::Group(old_group)) =
            (&mut node, self.tree.get_node_from_pathname(path)?)
        {
            new_group.children = old_group.children.clone();
        }

        let mut pathname = path.to_vec();
        if let Some(leaf) = pathname.last_mut() {
            *leaf = node.key().to_string();
        }

        let target = path.to_vec();
        self.apply(move |tree| tree.upsert_node_from_pathname(&target, node))?;
        self.follow_rename(path, &pathname);
        self.reanchor();
        self.save().await?;
        Ok(pathname)
    }

    /// Delete the node at `path`.
    pub async fn delete(&mut self, path: &[String]) -> Result<Node, EditorError> {
        let target = path.to_vec();
        self.commit(move |tree| tree.delete_node_from_pathname(&target)).await
    }

    /// Delete the group currently viewed and step back to its parent.
    pub async fn delete_current(&mut self) -> Result<Node, EditorError> {
        let current = self.path.clone();
        self.delete(&current).await
    }

    /// Persist the current tree.
    ///
    /// Refused while the tree holds rules of unknown type, so corrupt data
    /// loaded from storage is never written back.
    pub async fn save(&mut self) -> Result<(), EditorError> {
        let unknown = self.tree.unknown_nodes();
        if !unknown.is_empty() {
            warn!("Not saving: {} rule(s) of unknown type", unknown.len());
            return Err(EditorError::UnknownNodes(unknown));
        }
        self.bridge.save(&self.tree).await?;
        self.dirty = false;
        Ok(())
    }

    /// Replace the tree with one written elsewhere.
    ///
    /// The current path is re-anchored to its longest prefix that still
    /// resolves to a group. Returns whether the path moved. Unsaved local
    /// edits are discarded (last write wins).
    pub fn apply_external(&mut self, tree: RuleTree) -> bool {
        if self.dirty {
            warn!("Discarding unsaved edits in favor of an external update");
        }
        self.tree = tree;
        self.dirty = false;
        self.reanchor()
    }

    /// Follow a change notification from `subscribe`.
    ///
    /// Returns whether the viewed path had to move. An undecodable update is
    /// logged and ignored; a lagged subscription re-reads the stored tree.
    pub async fn apply_update(&mut self, update: TreeUpdate) -> Result<bool, EditorError> {
        let tree = match update {
            TreeUpdate::Replaced(tree) => tree,
            TreeUpdate::Removed => RuleTree::default(),
            TreeUpdate::Invalid(e) => {
                error!("Ignoring invalid rule tree update: {}", e);
                return Ok(false);
            }
            TreeUpdate::Lagged(skipped) => {
                warn!("Missed {} rule tree updates; re-reading", skipped);
                self.bridge.load_or_default().await?
            }
        };
        if tree == self.tree {
            return Ok(false);
        }
        Ok(self.apply_external(tree))
    }

    async fn commit<R>(
        &mut self,
        edit: impl FnOnce(&mut RuleTree) -> Result<R, TreeError>,
    ) -> Result<R, EditorError> {
        let output = self.apply(edit)?;
        self.reanchor();
        self.save().await?;
        Ok(output)
    }

    /// Mutate a copy of the tree and swap it in only on success.
    fn apply<R>(&mut self, edit: impl FnOnce(&mut RuleTree) -> Result<R, TreeError>) -> Result<R, TreeError> {
        let mut next = self.tree.deep_copy();
        let output = edit(&mut next)?;
        self.tree = next;
        self.dirty = true;
        Ok(output)
    }

    fn reanchor(&mut self) -> bool {
        let anchored = self.tree.resolve_prefix(&self.path);
        if anchored == self.path {
            return false;
        }
        info!(
            "Viewed path {} no longer resolves; moved to {}",
            self.path.join("/"),
            anchored.join("/")
        );
        self.path = anchored;
        true
    }

    /// Keep viewing a group that was just renamed, or one below it.
    fn follow_rename(&mut self, old: &[String], new: &[String]) {
        if old == new || !self.path.starts_with(old) {
            return;
        }
        let rest = self.path[old.len()..].to_vec();
        self.path = new.iter().cloned().chain(rest).collect();
    }
}
