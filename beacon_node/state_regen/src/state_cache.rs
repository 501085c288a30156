use crate::state_source::RegenState;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use types::{Hash256, Slot};

/// In-memory cache of recently used states, keyed by state root.
///
/// Bounded by entry count with least-recently-used eviction on `get`/`put`.
/// Finalization pruning is authoritative: `prune` removes old states no
/// matter how recently they were touched.
///
/// Not internally locked; the owner wraps it in a mutex and holds the lock
/// only for the O(1) map operation, never across replay.
pub struct StateCache<S: RegenState> {
    states: LruCache<Hash256, Arc<S>>,
}

impl<S: RegenState> StateCache<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            states: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Insert `state`, keyed by its state root.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn put(&mut self, state: Arc<S>) -> Option<(Hash256, Arc<S>)> {
        let state_root = state.state_root();
        self.states
            .push(state_root, state)
            // `push` also returns the previous value for an existing key;
            // only a different key is a true eviction.
            .filter(|(evicted_root, _)| *evicted_root != state_root)
    }

    /// Returns the state with the given root, marking it as recently used.
    pub fn get(&mut self, state_root: &Hash256) -> Option<Arc<S>> {
        self.states.get(state_root).cloned()
    }

    pub fn contains(&self, state_root: &Hash256) -> bool {
        self.states.contains(state_root)
    }

    pub fn delete(&mut self, state_root: &Hash256) {
        self.states.pop(state_root);
    }

    /// Remove every state with a slot strictly below `finalized_slot`,
    /// returning the number removed.
    pub fn prune(&mut self, finalized_slot: Slot) -> usize {
        let stale = self
            .states
            .iter()
            .filter(|(_, state)| state.slot() < finalized_slot)
            .map(|(state_root, _)| *state_root)
            .collect::<Vec<_>>();
        for state_root in &stale {
            self.states.pop(state_root);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
