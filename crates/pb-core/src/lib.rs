//! PageBlocker Core Library
//!
//! This crate provides the rule tree and matching engine for the PageBlocker
//! navigation blocker.
//!
//! # Architecture
//!
//! Blocking rules form a tree rooted at a single group. Every node below the
//! root is addressed by a pathname: the sequence of sibling-unique keys walked
//! from the root. Edits are clone-then-replace: the editing surface copies the
//! whole tree, mutates the copy through the pathname operations, and only then
//! publishes it as the new canonical tree.
//!
//! # Modules
//!
//! - `node`: Node variants and their identifying keys
//! - `tree`: `RuleTree` and the pathname-addressed read/write operations
//! - `schedule`: Time-of-day activity windows
//! - `matcher`: Recursive URL matching against a tree
//! - `url`: URL tokenization for word rules
//! - `document`: Persisted document shape (current and legacy schemas)
//! - `cache`: Wholesale-replaced tree cache shared with listeners

pub mod cache;
pub mod document;
pub mod error;
pub mod matcher;
pub mod node;
pub mod schedule;
pub mod tree;
pub mod url;

// Re-export commonly used types
pub use cache::TreeCache;
pub use document::{decode_str, decode_value, encode_string, encode_value, DocumentError, RawNode};
pub use error::TreeError;
pub use matcher::{matches, MatchDecision, MatchResult, Matcher, UnknownKindPolicy};
pub use node::{Group, Node, NodeKind, UnknownNode, UrlRule, WordRule};
pub use schedule::Schedule;
pub use tree::RuleTree;
