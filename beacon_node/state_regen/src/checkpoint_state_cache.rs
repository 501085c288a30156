use crate::state_source::RegenState;
use std::collections::HashMap;
use std::sync::Arc;
use types::{Checkpoint, Epoch, Slot};

/// A state inserted under `(epoch, root)` must sit exactly on the epoch
/// boundary; the caller is responsible for having advanced empty slots first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    SlotNotAligned {
        slot: Slot,
        boundary_slot: Slot,
    },
}

struct CacheEntry<S> {
    state: Arc<S>,
    last_access: u64,
}

/// Cache of epoch-boundary states, keyed by checkpoint.
///
/// Bounded by entry count. When full, the entry with the smallest epoch is
/// evicted first, ties broken by least-recent access; old epochs lose their
/// relevance before recently untouched ones do.
///
/// Not internally locked; see `StateCache`.
pub struct CheckpointStateCache<S: RegenState> {
    states: HashMap<Checkpoint, CacheEntry<S>>,
    capacity: usize,
    slots_per_epoch: u64,
    retention_epochs: u64,
    access_counter: u64,
}

impl<S: RegenState> CheckpointStateCache<S> {
    pub fn new(capacity: usize, slots_per_epoch: u64, retention_epochs: u64) -> Self {
        Self {
            states: HashMap::new(),
            capacity: capacity.max(1),
            slots_per_epoch,
            retention_epochs,
            access_counter: 0,
        }
    }

    /// Insert the state for `checkpoint`, evicting the lowest epoch if full.
    pub fn put(&mut self, checkpoint: Checkpoint, state: Arc<S>) -> Result<(), Error> {
        let boundary_slot = checkpoint.epoch.start_slot(self.slots_per_epoch);
        if state.slot() != boundary_slot {
            return Err(Error::SlotNotAligned {
                slot: state.slot(),
                boundary_slot,
            });
        }

        if !self.states.contains_key(&checkpoint) && self.states.len() >= self.capacity {
            if let Some(evictee) = self
                .states
                .iter()
                .min_by_key(|(key, entry)| (key.epoch, entry.last_access))
                .map(|(key, _)| *key)
            {
                self.states.remove(&evictee);
            }
        }

        self.access_counter += 1;
        self.states.insert(
            checkpoint,
            CacheEntry {
                state,
                last_access: self.access_counter,
            },
        );
        Ok(())
    }

    /// Returns the checkpoint state, marking it as recently used.
    pub fn get(&mut self, checkpoint: &Checkpoint) -> Option<Arc<S>> {
        self.access_counter += 1;
        let access = self.access_counter;
        self.states.get_mut(checkpoint).map(|entry| {
            entry.last_access = access;
            entry.state.clone()
        })
    }

    pub fn contains(&self, checkpoint: &Checkpoint) -> bool {
        self.states.contains_key(checkpoint)
    }

    /// Remove every entry more than the retention window below
    /// `finalized_epoch`, returning the number removed.
    pub fn prune_finalized(&mut self, finalized_epoch: Epoch) -> usize {
        let cutoff = finalized_epoch.saturating_sub(self.retention_epochs);
        let before = self.states.len();
        self.states.retain(|checkpoint, _| checkpoint.epoch >= cutoff);
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
