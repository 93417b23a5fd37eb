//! Rule tree node definitions
//!
//! A node is either a group that aggregates child rules, or one of the leaf
//! rule kinds. Every node is identified among its siblings by a key: its
//! `name` if it has one, otherwise its `word`, otherwise its `url`.

use std::collections::HashSet;

use crate::document::RawNode;
use crate::error::TreeError;
use crate::schedule::Schedule;

// =============================================================================
// Node Kinds
// =============================================================================

/// Discriminator stored in the `type` field of the persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Group,
    UrlRule,
    WordRule,
}

impl NodeKind {
    /// Canonical `type` value.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::UrlRule => "UrlRule",
            Self::WordRule => "WordRule",
        }
    }

    /// Parse a `type` value. Accepts the legacy numeric codes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Group" | "1" => Some(Self::Group),
            "UrlRule" | "2" => Some(Self::UrlRule),
            "WordRule" | "3" => Some(Self::WordRule),
            _ => None,
        }
    }
}

// =============================================================================
// Variants
// =============================================================================

/// Container rule. Matches if any child matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub is_root: bool,
    pub children: Vec<Node>,
    pub schedule: Schedule,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_root: false,
            children: Vec::new(),
            schedule: Schedule::ALWAYS,
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }
}

/// Blocks any URL containing `url` as a substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRule {
    pub name: Option<String>,
    pub url: String,
    pub schedule: Schedule,
}

/// Blocks any URL containing `word` as a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordRule {
    pub name: Option<String>,
    pub word: String,
    pub schedule: Schedule,
}

/// A node whose `type` was not recognized when it was loaded.
///
/// Kept verbatim so it survives a round trip and can be reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNode {
    pub key: String,
    pub raw: RawNode,
}

/// A node of the rule tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group(Group),
    Url(UrlRule),
    Word(WordRule),
    Unknown(UnknownNode),
}

impl From<Group> for Node {
    fn from(group: Group) -> Self {
        Node::Group(group)
    }
}

impl From<UrlRule> for Node {
    fn from(rule: UrlRule) -> Self {
        Node::Url(rule)
    }
}

impl From<WordRule> for Node {
    fn from(rule: WordRule) -> Self {
        Node::Word(rule)
    }
}

impl Node {
    /// Empty, non-root group.
    pub fn group(name: impl Into<String>) -> Self {
        Group::new(name).into()
    }

    /// Non-root group with the given children.
    pub fn group_with(name: impl Into<String>, children: Vec<Node>) -> Self {
        Group::new(name).with_children(children).into()
    }

    /// Unnamed URL rule, keyed by its pattern.
    pub fn url_rule(url: impl Into<String>) -> Self {
        Node::Url(UrlRule {
            name: None,
            url: url.into(),
            schedule: Schedule::ALWAYS,
        })
    }

    /// Unnamed word rule, keyed by its word.
    pub fn word_rule(word: impl Into<String>) -> Self {
        Node::Word(WordRule {
            name: None,
            word: word.into(),
            schedule: Schedule::ALWAYS,
        })
    }

    /// Set the display name, which becomes the node's key.
    ///
    /// Unknown nodes are left untouched.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            Node::Group(group) => group.name = name,
            Node::Url(rule) => rule.name = Some(name),
            Node::Word(rule) => rule.name = Some(name),
            Node::Unknown(_) => {}
        }
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        match &mut self {
            Node::Group(group) => group.schedule = schedule,
            Node::Url(rule) => rule.schedule = schedule,
            Node::Word(rule) => rule.schedule = schedule,
            Node::Unknown(_) => {}
        }
        self
    }

    /// Sibling-unique identifying key.
    pub fn key(&self) -> &str {
        match self {
            Node::Group(group) => &group.name,
            Node::Url(rule) => non_empty(&rule.name).unwrap_or(&rule.url),
            Node::Word(rule) => non_empty(&rule.name).unwrap_or(&rule.word),
            Node::Unknown(unknown) => &unknown.key,
        }
    }

    /// Value of the `type` field this node is stored under.
    pub fn kind_code(&self) -> &str {
        match self {
            Node::Group(_) => NodeKind::Group.code(),
            Node::Url(_) => NodeKind::UrlRule.code(),
            Node::Word(_) => NodeKind::WordRule.code(),
            Node::Unknown(unknown) => &unknown.raw.kind,
        }
    }

    pub fn schedule(&self) -> Schedule {
        match self {
            Node::Group(group) => group.schedule,
            Node::Url(rule) => rule.schedule,
            Node::Word(rule) => rule.schedule,
            Node::Unknown(_) => Schedule::ALWAYS,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Node::Group(group) if group.is_root)
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) => Some(group),
            _ => None,
        }
    }

    /// Immediate children; empty for leaves.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Group(group) => &group.children,
            _ => &[],
        }
    }

    /// Check the construction invariants of this node and its subtree.
    ///
    /// Does not reject `is_root` on `self`; that is the tree's concern.
    pub fn validate(&self) -> Result<(), TreeError> {
        match self {
            Node::Group(group) => {
                if group.name.is_empty() {
                    return Err(TreeError::MissingField {
                        kind: NodeKind::Group.code(),
                        field: "name",
                    });
                }
                validate_children(&group.children)
            }
            Node::Url(rule) => {
                if rule.url.is_empty() {
                    return Err(TreeError::MissingField {
                        kind: NodeKind::UrlRule.code(),
                        field: "url",
                    });
                }
                Ok(())
            }
            Node::Word(rule) => {
                if rule.word.is_empty() {
                    return Err(TreeError::MissingField {
                        kind: NodeKind::WordRule.code(),
                        field: "word",
                    });
                }
                Ok(())
            }
            Node::Unknown(unknown) if unknown.key.is_empty() => Err(TreeError::MissingKey),
            Node::Unknown(_) => Ok(()),
        }
    }
}

/// Validate a sibling list: unique keys, no nested roots, valid subtrees.
pub(crate) fn validate_children(children: &[Node]) -> Result<(), TreeError> {
    let mut seen = HashSet::with_capacity(children.len());
    for child in children {
        if child.is_root() {
            return Err(TreeError::RootViolation("only the top-level group may be the root"));
        }
        child.validate()?;
        if !seen.insert(child.key()) {
            return Err(TreeError::DuplicateKey {
                key: child.key().to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_precedence() {
        assert_eq!(Node::url_rule("facebook.com").key(), "facebook.com");
        assert_eq!(Node::url_rule("facebook.com").with_name("fb").key(), "fb");
        assert_eq!(Node::word_rule("casino").key(), "casino");
        assert_eq!(Node::group("social").key(), "social");
    }

    #[test]
    fn test_empty_name_falls_back_to_pattern() {
        let node = Node::url_rule("ads.example.com").with_name("");
        assert_eq!(node.key(), "ads.example.com");
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(NodeKind::from_code("1"), Some(NodeKind::Group));
        assert_eq!(NodeKind::from_code("2"), Some(NodeKind::UrlRule));
        assert_eq!(NodeKind::from_code("3"), Some(NodeKind::WordRule));
        assert_eq!(NodeKind::from_code("WordRule"), Some(NodeKind::WordRule));
        assert_eq!(NodeKind::from_code("ByRegex"), None);
        assert_eq!(Node::word_rule("x").kind_code(), "WordRule");
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let node = Node::group_with(
            "social",
            vec![
                Node::url_rule("facebook.com").with_name("fb"),
                Node::url_rule("fb.com").with_name("fb"),
            ],
        );
        assert_eq!(
            node.validate(),
            Err(TreeError::DuplicateKey { key: "fb".to_string() })
        );
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(matches!(
            Node::url_rule("").validate(),
            Err(TreeError::MissingField { field: "url", .. })
        ));
        assert!(matches!(
            Node::group("").validate(),
            Err(TreeError::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nested_root() {
        let mut inner = Group::new("inner");
        inner.is_root = true;
        let node = Node::group_with("outer", vec![inner.into()]);
        assert!(matches!(node.validate(), Err(TreeError::RootViolation(_))));
    }
}
