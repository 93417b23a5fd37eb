//! Persisted document format
//!
//! The whole tree is stored as a single JSON document under one storage key.
//!
//! # Schema versions
//!
//! - v2 (current): `{"schemaVersion": 2, "root": <node>}`. Nodes carry a
//!   `type` of `Group`, `UrlRule` or `WordRule`, group children live under
//!   `children`, and `startTime`/`endTime` are always present (nullable).
//! - v1 (legacy): a bare root node. `type` is one of the numeric codes
//!   `"1"`/`"2"`/`"3"`, children may be under `childs`, schedule fields may be
//!   missing, and the root may have a null name.
//!
//! Legacy documents decode transparently; every encode writes v2.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TreeError;
use crate::node::{non_empty, Group, Node, NodeKind, UnknownNode, UrlRule, WordRule};
use crate::schedule::{format_time, Schedule};
use crate::tree::RuleTree;

/// Storage key holding the document.
pub const STORAGE_KEY: &str = "blockedPages";

/// Version written by `encode_value`.
pub const SCHEMA_VERSION: u32 = 2;

/// Error type for document decoding.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(u32),
    #[error("Invalid rule tree: {0}")]
    Tree(#[from] TreeError),
}

// =============================================================================
// Wire Shapes
// =============================================================================

/// A node exactly as it appears in the document, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_root: bool,
    #[serde(default, alias = "childs", skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RawNode>>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeDocument {
    schema_version: u32,
    root: RawNode,
}

// =============================================================================
// Raw <-> Node
// =============================================================================

impl TryFrom<RawNode> for Node {
    type Error = TreeError;

    /// Build a node from raw data.
    ///
    /// Fails if none of the identifying fields is present. Children are
    /// constructed recursively the same way.
    fn try_from(raw: RawNode) -> Result<Self, TreeError> {
        let key = non_empty(&raw.name)
            .or_else(|| non_empty(&raw.word))
            .or_else(|| non_empty(&raw.url))
            .ok_or(TreeError::MissingKey)?
            .to_string();

        let kind = match NodeKind::from_code(&raw.kind) {
            Some(kind) => kind,
            None => {
                warn!("Unknown node type `{}` for `{}`", raw.kind, key);
                return Ok(Node::Unknown(UnknownNode { key, raw }));
            }
        };

        if kind != NodeKind::Group && raw.children.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(TreeError::InvalidOperation {
                key,
                operation: "attach children",
            });
        }

        let schedule = Schedule::parse(raw.start_time.as_deref(), raw.end_time.as_deref())?;
        let name = non_empty(&raw.name).map(str::to_string);

        let node = match kind {
            NodeKind::Group => {
                let name = name.ok_or(TreeError::MissingField {
                    kind: NodeKind::Group.code(),
                    field: "name",
                })?;
                let children = raw
                    .children
                    .unwrap_or_default()
                    .into_iter()
                    .map(Node::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Node::Group(Group {
                    name,
                    is_root: raw.is_root,
                    children,
                    schedule,
                })
            }
            NodeKind::UrlRule => Node::Url(UrlRule {
                name,
                url: non_empty(&raw.url)
                    .ok_or(TreeError::MissingField {
                        kind: NodeKind::UrlRule.code(),
                        field: "url",
                    })?
                    .to_string(),
                schedule,
            }),
            NodeKind::WordRule => Node::Word(WordRule {
                name,
                word: non_empty(&raw.word)
                    .ok_or(TreeError::MissingField {
                        kind: NodeKind::WordRule.code(),
                        field: "word",
                    })?
                    .to_string(),
                schedule,
            }),
        };

        node.validate()?;
        Ok(node)
    }
}

impl From<&Node> for RawNode {
    fn from(node: &Node) -> Self {
        let schedule = node.schedule();
        let mut raw = RawNode {
            kind: node.kind_code().to_string(),
            start_time: schedule.start.map(format_time),
            end_time: schedule.end.map(format_time),
            ..RawNode::default()
        };
        match node {
            Node::Group(group) => {
                raw.name = Some(group.name.clone());
                raw.is_root = group.is_root;
                raw.children = Some(group.children.iter().map(RawNode::from).collect());
            }
            Node::Url(rule) => {
                raw.name = rule.name.clone();
                raw.url = Some(rule.url.clone());
            }
            Node::Word(rule) => {
                raw.name = rule.name.clone();
                raw.word = Some(rule.word.clone());
            }
            Node::Unknown(unknown) => return unknown.raw.clone(),
        }
        raw
    }
}

// =============================================================================
// Document Encode / Decode
// =============================================================================

/// Check whether a stored value uses the legacy (v1) shape.
pub fn is_legacy(value: &Value) -> bool {
    value.get("schemaVersion").is_none()
}

/// Decode a stored document (either schema) into a validated tree.
pub fn decode_value(value: Value) -> Result<RuleTree, DocumentError> {
    let raw_root = if is_legacy(&value) {
        debug!("Decoding legacy v1 document");
        let mut raw: RawNode = serde_json::from_value(value)?;
        if raw.is_root && non_empty(&raw.name).is_none() {
            raw.name = Some(RuleTree::DEFAULT_ROOT_NAME.to_string());
        }
        raw
    } else {
        let doc: TreeDocument = serde_json::from_value(value)?;
        if doc.schema_version == 0 || doc.schema_version > SCHEMA_VERSION {
            return Err(DocumentError::UnsupportedVersion(doc.schema_version));
        }
        doc.root
    };

    let root = Node::try_from(raw_root)?;
    Ok(RuleTree::from_root(root)?)
}

/// Decode a document from JSON text.
pub fn decode_str(text: &str) -> Result<RuleTree, DocumentError> {
    decode_value(serde_json::from_str(text)?)
}

/// Encode a tree as a v2 document.
pub fn encode_value(tree: &RuleTree) -> Result<Value, DocumentError> {
    let doc = TreeDocument {
        schema_version: SCHEMA_VERSION,
        root: RawNode::from(tree.root()),
    };
    Ok(serde_json::to_value(doc)?)
}

/// Encode a tree as pretty-printed v2 JSON text.
pub fn encode_string(tree: &RuleTree) -> Result<String, DocumentError> {
    Ok(serde_json::to_string_pretty(&encode_value(tree)?)?)
}
