//! One-in-flight-per-key registry for regeneration work.
//!
//! The first caller to enter a key becomes the leader and receives a
//! [`WorkHandle`]; everyone else receives a broadcast receiver for the
//! leader's outcome. Completion removes the key *before* broadcasting, so a
//! caller arriving after completion starts the work afresh — failures are
//! never cached. A leader that disappears without completing (its handle is
//! dropped) wakes all waiters with a lost-sender error and they re-enter the
//! registry to elect a new leader.

use oneshot_broadcast::{Receiver, Sender, oneshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use types::{Checkpoint, Hash256, Slot};

/// Key identifying one unit of regeneration work. The variants form disjoint
/// namespaces, so a state load can never be confused with a replay of the
/// same root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKey {
    /// Cold-load of the state with the given root.
    State(Hash256),
    /// The state rooted at a block, advanced through empty slots.
    BlockSlot(Hash256, Slot),
    /// Materialization of a checkpoint state.
    Checkpoint(Checkpoint),
}

type Inflight<K, V> = Arc<Mutex<HashMap<K, Receiver<V>>>>;

/// Outcome of entering the registry for a key.
pub enum Entry<K: Copy + Eq + Hash, V: Clone> {
    /// This caller is first: it must perform the work and publish the outcome
    /// through the handle. The receiver yields the same outcome, letting the
    /// leader's caller await it like any other waiter.
    Leader(WorkHandle<K, V>, Receiver<V>),
    /// The work is already running; await the shared outcome.
    Waiter(Receiver<V>),
}

/// Registry of in-flight work, at most one entry per key.
pub struct InflightRegistry<K: Copy + Eq + Hash, V: Clone> {
    inflight: Inflight<K, V>,
}

impl<K: Copy + Eq + Hash, V: Clone> Default for InflightRegistry<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Copy + Eq + Hash, V: Clone> InflightRegistry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, key: K) -> Entry<K, V> {
        let mut inflight = self.inflight.lock();
        if let Some(receiver) = inflight.get(&key) {
            return Entry::Waiter(receiver.clone());
        }
        let (sender, receiver) = oneshot();
        inflight.insert(key, receiver.clone());
        Entry::Leader(
            WorkHandle {
                key,
                sender: Some(sender),
                inflight: self.inflight.clone(),
            },
            receiver,
        )
    }

    /// Number of keys with work currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }
}

/// Completion guard held by the worker for a key.
///
/// Exactly one of two things happens to a handle: `complete` publishes an
/// outcome, or the handle is dropped and the waiters re-elect a leader.
pub struct WorkHandle<K: Copy + Eq + Hash, V: Clone> {
    key: K,
    sender: Option<Sender<V>>,
    inflight: Inflight<K, V>,
}

impl<K: Copy + Eq + Hash, V: Clone> WorkHandle<K, V> {
    /// True while any caller beyond the registry itself is waiting on the
    /// outcome. The registry's own receiver accounts for one.
    pub fn has_waiters(&self) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 1)
    }

    /// Publish `outcome` to every waiter.
    ///
    /// The key is released before the broadcast so that a caller arriving
    /// after completion starts fresh rather than observing a stale entry.
    pub fn complete(mut self, outcome: V) {
        self.inflight.lock().remove(&self.key);
        if let Some(sender) = self.sender.take() {
            sender.send(outcome);
        }
    }
}

impl<K: Copy + Eq + Hash, V: Clone> Drop for WorkHandle<K, V> {
    fn drop(&mut self) {
        // Abandoned without completing: release the key, then drop the sender
        // so waiters wake up and re-enter the registry.
        if self.sender.is_some() {
            self.inflight.lock().remove(&self.key);
        }
    }
}
