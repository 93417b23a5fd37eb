//! Tree cache kept fresh by change notifications
//!
//! Each execution context holds one cache. It is seeded by an initial read
//! and then replaced wholesale, never merged, every time the stored document
//! changes. Readers take an `Arc` snapshot and never observe a half-applied
//! update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::tree::RuleTree;

pub struct TreeCache {
    current: RwLock<Arc<RuleTree>>,
    generation: AtomicU64,
}

impl Default for TreeCache {
    fn default() -> Self {
        Self::new(RuleTree::default())
    }
}

impl TreeCache {
    pub fn new(tree: RuleTree) -> Self {
        Self {
            current: RwLock::new(Arc::new(tree)),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the cached tree.
    pub fn refresh(&self, tree: RuleTree) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(tree);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Tree cache refreshed (generation {}, {} rules)", generation, guard.rule_count());
    }

    /// Current tree.
    pub fn snapshot(&self) -> Arc<RuleTree> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of refreshes since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
