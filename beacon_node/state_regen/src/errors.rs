use crate::state_source::StateSourceError;
use crate::transitioner::TransitionError;
use types::{Hash256, Slot};

/// Failure modes of the regeneration queries.
///
/// `Clone` so that a single outcome can be broadcast to every coalesced
/// waiter. No failure is ever cached: a later identical query re-attempts
/// the work from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenError {
    /// Fork choice has no such block; it was pruned or never seen.
    UnknownBlock(Hash256),
    /// The requested slot is below the block's own slot.
    InvalidSlot {
        block_slot: Slot,
        requested_slot: Slot,
    },
    /// The root is unknown to persistent storage and not reachable by replay.
    StateNotAvailable(Hash256),
    /// Deterministic transition failure; the query's inputs are inconsistent.
    Transition(TransitionError),
    /// The persistent store failed.
    Store(String),
    /// The runtime tore the work down before it produced an outcome.
    Cancelled,
}

impl From<TransitionError> for RegenError {
    fn from(e: TransitionError) -> Self {
        Self::Transition(e)
    }
}

impl From<StateSourceError> for RegenError {
    fn from(e: StateSourceError) -> Self {
        match e {
            StateSourceError::StateNotPersisted(root) => Self::StateNotAvailable(root),
            StateSourceError::Store(message) => Self::Store(message),
        }
    }
}
