use crate::block_source::RegenBlock;
use crate::state_source::RegenState;
use types::{Hash256, Slot};

/// Deterministic failure from the state-transition function. Indicates
/// inconsistent inputs, never a transient condition.
///
/// `Clone` so a single failure can be broadcast to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    TargetSlotBelowState { state_slot: Slot, target_slot: Slot },
    BlockSlotMismatch { state_slot: Slot, block_slot: Slot },
    StateRootMismatch { expected: Hash256, observed: Hash256 },
    InvalidSignature,
    Other(String),
}

/// Pure state-transition engine.
///
/// Stateless: concurrent invocations on distinct states are independent, and
/// identical inputs always produce identical outputs.
pub trait Transitioner: Send + Sync + 'static {
    type Block: RegenBlock;
    type State: RegenState;

    /// Advance `state` through empty slots up to and including `target_slot`,
    /// running per-slot and (on epoch boundaries) per-epoch processing.
    ///
    /// `target_slot` must not be below `state.slot()`.
    fn process_slots(
        &self,
        state: &Self::State,
        target_slot: Slot,
    ) -> Result<Self::State, TransitionError>;

    /// Apply `block` to `state`. The state must already have been advanced so
    /// that `state.slot() == block.slot()`.
    fn process_block(
        &self,
        state: &Self::State,
        block: &Self::Block,
    ) -> Result<Self::State, TransitionError>;
}
