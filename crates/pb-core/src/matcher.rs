//! Core Matching Engine
//!
//! Decides whether a navigated URL is blocked by a rule tree. Groups are a
//! short-circuiting OR over their children, evaluated depth-first in
//! insertion order.

use chrono::NaiveTime;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::url::contains_word;

// =============================================================================
// Policy
// =============================================================================

/// What to do with a node whose kind was not recognized on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownKindPolicy {
    /// Ignore the node: it never blocks.
    #[default]
    FailOpen,
    /// Treat the node as matching every URL.
    FailClosed,
}

impl UnknownKindPolicy {
    /// Parse from a config or CLI string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail-open" | "open" | "ignore" => Some(Self::FailOpen),
            "fail-closed" | "closed" | "block" => Some(Self::FailClosed),
            _ => None,
        }
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a navigated URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// No active rule matched
    Allow,
    /// A rule matched; the navigation should be redirected
    Block,
}

/// Result of matching a URL against a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub decision: MatchDecision,
    /// Pathname of the rule that matched, relative to the node matched against
    pub rule_path: Option<Vec<String>>,
}

impl MatchResult {
    pub fn allow() -> Self {
        Self {
            decision: MatchDecision::Allow,
            rule_path: None,
        }
    }

    pub fn block(rule_path: Vec<String>) -> Self {
        Self {
            decision: MatchDecision::Block,
            rule_path: Some(rule_path),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == MatchDecision::Block
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Recursive URL matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    unknown_kinds: UnknownKindPolicy,
}

impl Matcher {
    pub fn new(unknown_kinds: UnknownKindPolicy) -> Self {
        Self { unknown_kinds }
    }

    pub fn unknown_kind_policy(&self) -> UnknownKindPolicy {
        self.unknown_kinds
    }

    /// True iff `url` is blocked by `node`, ignoring schedules.
    pub fn matches(&self, url: &str, node: &Node) -> bool {
        self.match_url(url, node).is_blocked()
    }

    /// Match `url` against `node`, ignoring schedules.
    pub fn match_url(&self, url: &str, node: &Node) -> MatchResult {
        self.match_url_at(url, node, None)
    }

    /// Match `url` against `node`.
    ///
    /// With `now` set, a node whose schedule window does not contain `now` is
    /// inactive, and so is everything below it.
    pub fn match_url_at(&self, url: &str, node: &Node, now: Option<NaiveTime>) -> MatchResult {
        let mut path = Vec::new();
        if self.find(url, node, now, &mut path) {
            MatchResult::block(path)
        } else {
            MatchResult::allow()
        }
    }

    fn find(&self, url: &str, node: &Node, now: Option<NaiveTime>, path: &mut Vec<String>) -> bool {
        if let Some(now) = now {
            if !node.schedule().is_active_at(now) {
                return false;
            }
        }

        match node {
            Node::Url(rule) => url.contains(rule.url.as_str()),
            Node::Word(rule) => contains_word(url, &rule.word),
            Node::Group(group) => {
                for child in &group.children {
                    path.push(child.key().to_string());
                    if self.find(url, child, now, path) {
                        return true;
                    }
                    path.pop();
                }
                false
            }
            Node::Unknown(unknown) => match self.unknown_kinds {
                UnknownKindPolicy::FailOpen => {
                    warn!("Ignoring rule `{}` of unknown type `{}`", unknown.key, unknown.raw.kind);
                    false
                }
                UnknownKindPolicy::FailClosed => {
                    warn!("Blocking on rule `{}` of unknown type `{}`", unknown.key, unknown.raw.kind);
                    true
                }
            },
        }
    }
}

/// Match with the default (fail-open) policy, ignoring schedules.
pub fn matches(url: &str, node: &Node) -> bool {
    Matcher::default().matches(url, node)
}
