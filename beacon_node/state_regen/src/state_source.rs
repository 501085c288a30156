use types::{Hash256, Slot};

/// The fields of a state the regenerator is allowed to observe.
///
/// A state may be hundreds of megabytes; the regenerator only ever holds them
/// behind `Arc` and relies on the last holder dropping its reference for
/// release.
pub trait RegenState: Send + Sync + 'static {
    fn slot(&self) -> Slot;

    /// Root identifying this state. Must be stable for the lifetime of the
    /// value; it is the key under which the state is cached.
    fn state_root(&self) -> Hash256;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSourceError {
    /// The root is unknown to persistent storage.
    StateNotPersisted(Hash256),
    /// The store itself failed.
    Store(String),
}

/// Read-only view over the persistent state store.
pub trait StateSource: Send + Sync + 'static {
    type State: RegenState;

    /// Load a full state from the persistent store.
    ///
    /// May block on I/O; the regenerator always calls this from the blocking
    /// pool.
    fn load_state(&self, state_root: Hash256) -> Result<Self::State, StateSourceError>;
}
