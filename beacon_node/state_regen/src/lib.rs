//! On-demand regeneration of beacon states.
//!
//! Answers queries of the form "the state valid for block `B` at slot `S`" by
//! combining:
//!
//! - a hot LRU cache of recently used states,
//! - a cache of epoch-boundary checkpoint states,
//! - a content-addressed cold store of persisted states, and
//! - a replay driver that re-applies blocks on top of an ancestor's state.
//!
//! Identical concurrent queries are coalesced so that each distinct load or
//! replay runs at most once, no matter how many callers are waiting on it.
//! Replays pick the most recent viable epoch-boundary anchor to minimise the
//! number of blocks re-applied.
//!
//! Fork choice, the block/state database and the state-transition function
//! itself are collaborators, abstracted behind the [`BlockSource`],
//! [`StateSource`] and [`Transitioner`] traits and tied together by the
//! [`RegenTypes`] witness trait.

pub mod block_source;
pub mod checkpoint_state_cache;
pub mod config;
pub mod errors;
pub mod inflight;
pub mod metrics;
pub mod rayon_manager;
pub mod regenerator;
pub mod state_cache;
pub mod state_source;
pub mod test_utils;
pub mod transitioner;

pub use block_source::{BlockSource, FinalizedAnchor, RegenBlock};
pub use checkpoint_state_cache::CheckpointStateCache;
pub use config::RegenConfig;
pub use errors::RegenError;
pub use inflight::WorkKey;
pub use regenerator::{RegenTypes, Regenerator};
pub use state_cache::StateCache;
pub use state_source::{RegenState, StateSource, StateSourceError};
pub use transitioner::{TransitionError, Transitioner};
