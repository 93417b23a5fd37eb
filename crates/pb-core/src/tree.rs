//! Pathname-addressed rule tree
//!
//! A pathname is the sequence of sibling keys walked from the root; the empty
//! pathname addresses the root itself. Mutations split a pathname into
//! `(parent, leaf)`, resolve the parent, and act on its immediate children.

use std::fmt;

use crate::error::TreeError;
use crate::node::{Group, Node};

// =============================================================================
// Node-level Operations
// =============================================================================

impl Node {
    /// Position of the child with `key`, or `None` if absent (or a leaf).
    pub fn node_index(&self, key: &str) -> Option<usize> {
        self.children().iter().position(|child| child.key() == key)
    }

    /// Immediate child with `key`.
    pub fn get_node(&self, key: &str) -> Result<&Node, TreeError> {
        let group = match self {
            Node::Group(group) => group,
            other => return Err(not_a_group(other, "look up a child")),
        };
        group
            .children
            .iter()
            .find(|child| child.key() == key)
            .ok_or_else(|| TreeError::NotFound {
                key: key.to_string(),
            })
    }

    pub fn get_node_mut(&mut self, key: &str) -> Result<&mut Node, TreeError> {
        let group = match self {
            Node::Group(group) => group,
            other => return Err(not_a_group(other, "look up a child")),
        };
        group
            .children
            .iter_mut()
            .find(|child| child.key() == key)
            .ok_or_else(|| TreeError::NotFound {
                key: key.to_string(),
            })
    }

    /// Replace the child with `key` in place, or append `value` if absent.
    ///
    /// `value` may carry a different key than `key` (a rename), as long as
    /// the new key does not collide with another sibling.
    pub fn upsert_node(&mut self, key: &str, value: Node) -> Result<(), TreeError> {
        if value.is_root() {
            return Err(TreeError::RootViolation("only the top-level group may be the root"));
        }
        value.validate()?;

        let group = match self {
            Node::Group(group) => group,
            other => return Err(not_a_group(other, "upsert a child")),
        };

        let existing = group.children.iter().position(|child| child.key() == key);
        let clash = group
            .children
            .iter()
            .position(|child| child.key() == value.key());

        match (existing, clash) {
            (Some(index), Some(other)) if index != other => Err(TreeError::DuplicateKey {
                key: value.key().to_string(),
            }),
            (Some(index), _) => {
                group.children[index] = value;
                Ok(())
            }
            (None, Some(_)) => Err(TreeError::DuplicateKey {
                key: value.key().to_string(),
            }),
            (None, None) => {
                group.children.push(value);
                Ok(())
            }
        }
    }

    /// Remove and return the child with `key`.
    ///
    /// An absent key is a `NotFound` error; no other sibling is touched.
    pub fn delete_node(&mut self, key: &str) -> Result<Node, TreeError> {
        let group = match self {
            Node::Group(group) => group,
            other => return Err(not_a_group(other, "delete a child")),
        };
        let index = group
            .children
            .iter()
            .position(|child| child.key() == key)
            .ok_or_else(|| TreeError::NotFound {
                key: key.to_string(),
            })?;
        Ok(group.children.remove(index))
    }

    /// Walk `path` from this node, one `get_node` per segment.
    pub fn get_node_from_pathname<S: AsRef<str>>(&self, path: &[S]) -> Result<&Node, TreeError> {
        path.iter()
            .try_fold(self, |node, segment| node.get_node(segment.as_ref()))
    }

    pub fn get_node_from_pathname_mut<S: AsRef<str>>(
        &mut self,
        path: &[S],
    ) -> Result<&mut Node, TreeError> {
        let mut node = self;
        for segment in path {
            node = node.get_node_mut(segment.as_ref())?;
        }
        Ok(node)
    }

    pub fn upsert_node_from_pathname<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: Node,
    ) -> Result<(), TreeError> {
        let (leaf, parent) = split_pathname(path)?;
        self.get_node_from_pathname_mut(parent)?.upsert_node(leaf, value)
    }

    pub fn delete_node_from_pathname<S: AsRef<str>>(&mut self, path: &[S]) -> Result<Node, TreeError> {
        let (leaf, parent) = split_pathname(path)?;
        self.get_node_from_pathname_mut(parent)?.delete_node(leaf)
    }
}

fn split_pathname<S: AsRef<str>>(path: &[S]) -> Result<(&str, &[S]), TreeError> {
    let (leaf, parent) = path
        .split_last()
        .ok_or(TreeError::RootViolation("the empty pathname addresses the root"))?;
    Ok((leaf.as_ref(), parent))
}

fn not_a_group(node: &Node, operation: &'static str) -> TreeError {
    TreeError::InvalidOperation {
        key: node.key().to_string(),
        operation,
    }
}

// =============================================================================
// Rule Tree
// =============================================================================

/// A validated rule tree: exactly one root group, marked `is_root`, with
/// sibling-unique keys at every level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTree {
    root: Node,
}

impl Default for RuleTree {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROOT_NAME)
    }
}

impl RuleTree {
    /// Name given to the root at first install.
    pub const DEFAULT_ROOT_NAME: &'static str = "All pages";

    /// Tree holding only an empty root.
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut root = Group::new(root_name);
        root.is_root = true;
        Self { root: root.into() }
    }

    /// Wrap an existing root node, checking the tree invariants.
    pub fn from_root(root: Node) -> Result<Self, TreeError> {
        if !root.is_root() {
            return Err(TreeError::RootViolation("the tree root must be a group marked isRoot"));
        }
        root.validate()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn name(&self) -> &str {
        self.root.key()
    }

    pub fn get_node_from_pathname<S: AsRef<str>>(&self, path: &[S]) -> Result<&Node, TreeError> {
        self.root.get_node_from_pathname(path)
    }

    pub fn upsert_node_from_pathname<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: Node,
    ) -> Result<(), TreeError> {
        self.root.upsert_node_from_pathname(path, value)
    }

    pub fn delete_node_from_pathname<S: AsRef<str>>(&mut self, path: &[S]) -> Result<Node, TreeError> {
        self.root.delete_node_from_pathname(path)
    }

    /// Fully independent copy of the tree.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Longest prefix of `path` that still resolves to a group.
    pub fn resolve_prefix<S: AsRef<str>>(&self, path: &[S]) -> Vec<String> {
        let mut node = &self.root;
        let mut resolved = Vec::with_capacity(path.len());
        for segment in path {
            match node.get_node(segment.as_ref()) {
                Ok(child) if child.is_group() => {
                    resolved.push(segment.as_ref().to_string());
                    node = child;
                }
                _ => break,
            }
        }
        resolved
    }

    /// Pathnames of every node whose kind was not recognized on load.
    pub fn unknown_nodes(&self) -> Vec<Vec<String>> {
        let mut found = Vec::new();
        let mut path = Vec::new();
        collect_unknown(&self.root, &mut path, &mut found);
        found
    }

    /// Number of non-group rules in the tree.
    pub fn rule_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            match node {
                Node::Group(group) => group.children.iter().map(count).sum(),
                _ => 1,
            }
        }
        count(&self.root)
    }
}

fn collect_unknown(node: &Node, path: &mut Vec<String>, found: &mut Vec<Vec<String>>) {
    for child in node.children() {
        path.push(child.key().to_string());
        if matches!(child, Node::Unknown(_)) {
            found.push(path.clone());
        }
        collect_unknown(child, path, found);
        path.pop();
    }
}

impl fmt::Display for RuleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, depth: usize) -> fmt::Result {
            let indent = "  ".repeat(depth);
            match node {
                Node::Group(group) => writeln!(f, "{indent}{}/", group.name)?,
                Node::Url(rule) if rule.name.is_some() => {
                    writeln!(f, "{indent}{} [url: {}]", node.key(), rule.url)?
                }
                Node::Url(rule) => writeln!(f, "{indent}{} [url]", rule.url)?,
                Node::Word(rule) => writeln!(f, "{indent}{} [word: {}]", node.key(), rule.word)?,
                Node::Unknown(unknown) => {
                    writeln!(f, "{indent}{} [unknown type `{}`]", unknown.key, unknown.raw.kind)?
                }
            }
            let schedule = node.schedule();
            if !schedule.is_always() {
                let fmt_bound = |t: Option<chrono::NaiveTime>| {
                    t.map(crate::schedule::format_time).unwrap_or_else(|| "--:--".to_string())
                };
                writeln!(f, "{indent}  (active {} - {})", fmt_bound(schedule.start), fmt_bound(schedule.end))?;
            }
            for child in node.children() {
                write_node(f, child, depth + 1)?;
            }
            Ok(())
        }
        write_node(f, &self.root, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> RuleTree {
        let mut tree = RuleTree::new("root");
        tree.upsert_node_from_pathname(&["social"], Node::group("social")).unwrap();
        tree.upsert_node_from_pathname(
            &["social", "fb"],
            Node::url_rule("facebook.com").with_name("fb"),
        )
        .unwrap();
        tree.upsert_node_from_pathname(&["social", "twitter.com"], Node::url_rule("twitter.com"))
            .unwrap();
        tree.upsert_node_from_pathname(&["social", "x.com"], Node::url_rule("x.com"))
            .unwrap();
        tree
    }

    #[test]
    fn test_upsert_then_get_returns_value() {
        let mut tree = RuleTree::new("root");
        tree.upsert_node_from_pathname(&["social"], Node::group("social")).unwrap();
        let rule = Node::url_rule("facebook.com").with_name("fb");
        tree.upsert_node_from_pathname(&["social", "fb"], rule.clone()).unwrap();

        assert_eq!(tree.get_node_from_pathname(&["social", "fb"]).unwrap(), &rule);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut tree = sample_tree();
        let replacement = Node::url_rule("m.facebook.com").with_name("fb");
        tree.upsert_node_from_pathname(&["social", "fb"], replacement.clone())
            .unwrap();

        let social = tree.get_node_from_pathname(&["social"]).unwrap();
        assert_eq!(social.children().len(), 3);
        assert_eq!(social.node_index("fb"), Some(0));
        assert_eq!(social.get_node("fb").unwrap(), &replacement);
    }

    #[test]
    fn test_upsert_rename_keeps_position() {
        let mut tree = sample_tree();
        tree.upsert_node_from_pathname(
            &["social", "fb"],
            Node::url_rule("facebook.com").with_name("facebook"),
        )
        .unwrap();

        let social = tree.get_node_from_pathname(&["social"]).unwrap();
        assert_eq!(social.node_index("fb"), None);
        assert_eq!(social.node_index("facebook"), Some(0));
    }

    #[test]
    fn test_upsert_rename_onto_sibling_fails() {
        let mut tree = sample_tree();
        let before = tree.clone();
        let result = tree.upsert_node_from_pathname(&["social", "fb"], Node::url_rule("x.com"));

        assert_eq!(result, Err(TreeError::DuplicateKey { key: "x.com".to_string() }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_upsert_on_leaf_is_invalid_operation() {
        let mut tree = sample_tree();
        let result = tree.upsert_node_from_pathname(&["social", "fb", "child"], Node::url_rule("a.com"));
        assert_eq!(
            result,
            Err(TreeError::InvalidOperation {
                key: "fb".to_string(),
                operation: "upsert a child",
            })
        );
    }

    #[test]
    fn test_pathname_through_leaf_is_invalid_operation() {
        let tree = sample_tree();
        assert_eq!(
            tree.get_node_from_pathname(&["social", "fb", "child"]),
            Err(TreeError::InvalidOperation {
                key: "fb".to_string(),
                operation: "look up a child",
            })
        );
    }

    #[test]
    fn test_upsert_root_marked_node_rejected() {
        let mut tree = sample_tree();
        let mut impostor = Group::new("other");
        impostor.is_root = true;
        assert!(matches!(
            tree.upsert_node_from_pathname(&["other"], impostor.into()),
            Err(TreeError::RootViolation(_))
        ));
    }

    #[test]
    fn test_empty_pathname_cannot_be_replaced_or_deleted() {
        let mut tree = sample_tree();
        let empty: [&str; 0] = [];
        assert!(matches!(
            tree.upsert_node_from_pathname(&empty, Node::group("x")),
            Err(TreeError::RootViolation(_))
        ));
        assert!(matches!(
            tree.delete_node_from_pathname(&empty),
            Err(TreeError::RootViolation(_))
        ));
        assert_eq!(tree.get_node_from_pathname(&empty).unwrap(), tree.root());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let tree = sample_tree();
        assert_eq!(
            tree.get_node_from_pathname(&["social", "reddit"]),
            Err(TreeError::NotFound { key: "reddit".to_string() })
        );
        assert_eq!(
            tree.get_node_from_pathname(&["news", "fb"]),
            Err(TreeError::NotFound { key: "news".to_string() })
        );
    }

    #[test]
    fn test_delete_preserves_sibling_order() {
        let mut tree = sample_tree();
        let removed = tree
            .delete_node_from_pathname(&["social", "twitter.com"])
            .unwrap();
        assert_eq!(removed.key(), "twitter.com");

        let social = tree.get_node_from_pathname(&["social"]).unwrap();
        let keys: Vec<&str> = social.children().iter().map(Node::key).collect();
        assert_eq!(keys, vec!["fb", "x.com"]);
        assert_eq!(social.node_index("twitter.com"), None);
    }

    #[test]
    fn test_delete_absent_key_touches_nothing() {
        let mut tree = sample_tree();
        let before = tree.clone();
        assert_eq!(
            tree.delete_node_from_pathname(&["social", "reddit"]),
            Err(TreeError::NotFound { key: "reddit".to_string() })
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn test_social_scenario() {
        let mut tree = RuleTree::new("root");
        tree.upsert_node_from_pathname(&["social"], Node::group("social")).unwrap();
        tree.upsert_node_from_pathname(&["social", "fb"], Node::url_rule("facebook.com").with_name("fb"))
            .unwrap();
        assert_eq!(
            tree.get_node_from_pathname(&["social", "fb"]).unwrap(),
            &Node::url_rule("facebook.com").with_name("fb")
        );

        tree.delete_node_from_pathname(&["social", "fb"]).unwrap();
        let social = tree.get_node_from_pathname(&["social"]).unwrap();
        assert_eq!(social.node_index("fb"), None);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let tree = sample_tree();
        let mut copy = tree.deep_copy();
        assert_eq!(copy, tree);

        copy.delete_node_from_pathname(&["social", "fb"]).unwrap();
        copy.upsert_node_from_pathname(&["news"], Node::group("news")).unwrap();

        assert_ne!(copy, tree);
        assert!(tree.get_node_from_pathname(&["social", "fb"]).is_ok());
        assert!(tree.get_node_from_pathname(&["news"]).is_err());
    }

    #[test]
    fn test_from_root_requires_root_group() {
        assert!(matches!(
            RuleTree::from_root(Node::group("not-root")),
            Err(TreeError::RootViolation(_))
        ));
        assert!(matches!(
            RuleTree::from_root(Node::url_rule("a.com")),
            Err(TreeError::RootViolation(_))
        ));
        let tree = sample_tree();
        assert_eq!(RuleTree::from_root(tree.root().clone()).unwrap(), tree);
    }

    #[test]
    fn test_resolve_prefix_stops_at_missing_or_leaf() {
        let tree = sample_tree();
        assert_eq!(tree.resolve_prefix(&["social"]), vec!["social"]);
        assert_eq!(tree.resolve_prefix(&["social", "fb"]), vec!["social"]);
        assert!(tree.resolve_prefix(&["gone", "deeper"]).is_empty());
    }

    #[test]
    fn test_rule_count() {
        assert_eq!(sample_tree().rule_count(), 3);
        assert_eq!(RuleTree::default().rule_count(), 0);
    }

    #[test]
    fn test_display_lists_tree() {
        let text = sample_tree().to_string();
        assert!(text.starts_with("root/\n"));
        assert!(text.contains("  social/\n"));
        assert!(text.contains("    fb [url: facebook.com]\n"));
        assert!(text.contains("    x.com [url]\n"));
    }
}
