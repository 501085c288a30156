use crate::block_source::{BlockSource, FinalizedAnchor, RegenBlock};
use crate::checkpoint_state_cache::CheckpointStateCache;
use crate::config::RegenConfig;
use crate::errors::RegenError;
use crate::inflight::{Entry, InflightRegistry, WorkHandle, WorkKey};
use crate::metrics;
use crate::rayon_manager::RayonManager;
use crate::state_cache::StateCache;
use crate::state_source::{RegenState, StateSource};
use crate::transitioner::Transitioner;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use types::{Checkpoint, Epoch, Hash256, Slot, non_zero_usize::new_non_zero_usize};

/// Number of state roots the block processor can pin for hot-cache insertion
/// before the oldest pin is forgotten.
const PINNED_ROOTS_CAPACITY: NonZeroUsize = new_non_zero_usize(64);

/// Ties together the collaborator implementations behind the regenerator.
pub trait RegenTypes: Send + Sync + Sized + 'static {
    type Block: RegenBlock;
    type State: RegenState;
    type BlockSource: BlockSource<Block = Self::Block>;
    type StateSource: StateSource<State = Self::State>;
    type Transitioner: Transitioner<Block = Self::Block, State = Self::State>;
}

type Outcome<S> = Result<Arc<S>, RegenError>;

/// Regenerates beacon states on demand.
///
/// Four queries are exposed: [`get_state`](Regenerator::get_state),
/// [`get_block_slot_state`](Regenerator::get_block_slot_state),
/// [`get_checkpoint_state`](Regenerator::get_checkpoint_state) and
/// [`get_pre_state`](Regenerator::get_pre_state). Each is answered from the
/// caches where possible, otherwise by cold-loading an ancestor state and
/// replaying the intervening slots and blocks.
///
/// Loads and replays for the same key are deduplicated: the first caller
/// performs the work on a detached task and every concurrent caller observes
/// the identical outcome. Dropping a query future detaches that caller only;
/// the work is torn down cooperatively once nobody is waiting on it.
pub struct Regenerator<T: RegenTypes> {
    config: RegenConfig,
    slots_per_epoch: u64,
    block_source: Arc<T::BlockSource>,
    state_source: Arc<T::StateSource>,
    transitioner: Arc<T::Transitioner>,
    state_cache: Mutex<StateCache<T::State>>,
    checkpoint_cache: Mutex<CheckpointStateCache<T::State>>,
    inflight: InflightRegistry<WorkKey, Outcome<T::State>>,
    replay_permits: Arc<Semaphore>,
    rayon: RayonManager,
    finalized: RwLock<FinalizedAnchor>,
    pinned_roots: Mutex<LruCache<Hash256, ()>>,
}

impl<T: RegenTypes> Regenerator<T> {
    pub fn new(
        block_source: Arc<T::BlockSource>,
        state_source: Arc<T::StateSource>,
        transitioner: Arc<T::Transitioner>,
        slots_per_epoch: u64,
        config: RegenConfig,
    ) -> Arc<Self> {
        let finalized = block_source.finalized();
        Arc::new(Self {
            state_cache: Mutex::new(StateCache::new(config.max_hot_states)),
            checkpoint_cache: Mutex::new(CheckpointStateCache::new(
                config.max_checkpoint_states,
                slots_per_epoch,
                config.checkpoint_retention_epochs,
            )),
            inflight: InflightRegistry::new(),
            replay_permits: Arc::new(Semaphore::new(config.max_concurrent_replays)),
            rayon: RayonManager::default(),
            finalized: RwLock::new(finalized),
            pinned_roots: Mutex::new(LruCache::new(PINNED_ROOTS_CAPACITY)),
            config,
            slots_per_epoch,
            block_source,
            state_source,
            transitioner,
        })
    }

    /// Return the state with the given root, from the hot cache or the
    /// persistent store.
    pub async fn get_state(self: &Arc<Self>, state_root: Hash256) -> Outcome<T::State> {
        if let Some(state) = self.try_hot(&state_root) {
            return Ok(state);
        }
        metrics::inc_counter(&metrics::HOT_CACHE_MISSES);
        loop {
            match self.inflight.enter(WorkKey::State(state_root)) {
                Entry::Waiter(receiver) => {
                    metrics::inc_counter(&metrics::COALESCED_JOINS);
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
                Entry::Leader(handle, receiver) => {
                    let regen = self.clone();
                    tokio::spawn(async move {
                        let outcome = regen.load_state_work(state_root).await;
                        handle.complete(outcome);
                    });
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
            }
            // The leader vanished without an outcome. It may have inserted
            // into the cache before dying; check, then take over the work.
            if let Some(state) = self.try_hot(&state_root) {
                return Ok(state);
            }
        }
    }

    /// Return the state rooted at `block_root`, advanced through empty slots
    /// to `slot`.
    ///
    /// The result is transient with respect to the hot cache, but lands in
    /// the checkpoint cache when `slot` is an epoch boundary.
    pub async fn get_block_slot_state(
        self: &Arc<Self>,
        block_root: Hash256,
        slot: Slot,
    ) -> Outcome<T::State> {
        let block = self
            .block_source
            .get_block(block_root)
            .ok_or(RegenError::UnknownBlock(block_root))?;
        if slot < block.slot() {
            return Err(RegenError::InvalidSlot {
                block_slot: block.slot(),
                requested_slot: slot,
            });
        }
        if let Some(state) = self.try_checkpoint_for_slot(block_root, slot) {
            return Ok(state);
        }
        loop {
            match self.inflight.enter(WorkKey::BlockSlot(block_root, slot)) {
                Entry::Waiter(receiver) => {
                    metrics::inc_counter(&metrics::COALESCED_JOINS);
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
                Entry::Leader(handle, receiver) => {
                    let regen = self.clone();
                    let block = block.clone();
                    tokio::spawn(async move {
                        if let Some(outcome) =
                            regen.block_slot_state_work(block, slot, &handle).await
                        {
                            handle.complete(outcome);
                        }
                    });
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
            }
            if let Some(state) = self.try_checkpoint_for_slot(block_root, slot) {
                return Ok(state);
            }
        }
    }

    /// Return the state at the first slot of `checkpoint.epoch`, rooted at
    /// `checkpoint.root`.
    pub async fn get_checkpoint_state(
        self: &Arc<Self>,
        checkpoint: Checkpoint,
    ) -> Outcome<T::State> {
        if let Some(state) = self.try_checkpoint(&checkpoint) {
            return Ok(state);
        }
        metrics::inc_counter(&metrics::CHECKPOINT_CACHE_MISSES);
        loop {
            match self.inflight.enter(WorkKey::Checkpoint(checkpoint)) {
                Entry::Waiter(receiver) => {
                    metrics::inc_counter(&metrics::COALESCED_JOINS);
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
                Entry::Leader(handle, receiver) => {
                    let regen = self.clone();
                    tokio::spawn(async move {
                        let boundary_slot = checkpoint.epoch.start_slot(regen.slots_per_epoch);
                        // The inner query publishes into the checkpoint cache
                        // on our behalf; it shares our key's waiters through
                        // its own coalescing.
                        let outcome = regen
                            .get_block_slot_state(checkpoint.root, boundary_slot)
                            .await;
                        handle.complete(outcome);
                    });
                    if let Ok(outcome) = receiver.recv().await {
                        return outcome;
                    }
                }
            }
            if let Some(state) = self.try_checkpoint(&checkpoint) {
                return Ok(state);
            }
        }
    }

    /// Return a state on which `block` can be applied, replaying from the
    /// most recent epoch-boundary anchor whose block is still known.
    pub async fn get_pre_state(self: &Arc<Self>, block: &T::Block) -> Outcome<T::State> {
        let parent_root = block.parent_root();
        if self.block_source.get_block(parent_root).is_none() {
            return Err(RegenError::UnknownBlock(parent_root));
        }
        let target_epoch = block.slot().epoch(self.slots_per_epoch);
        let boundary_slot = target_epoch.start_slot(self.slots_per_epoch);

        // The ancestor walk may touch the block database.
        let block_source = self.block_source.clone();
        let mut chain = tokio::task::spawn_blocking(move || {
            block_source
                .ancestors(parent_root, boundary_slot)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|_| RegenError::Cancelled)?;

        let anchor = chain
            .last()
            .cloned()
            .ok_or(RegenError::UnknownBlock(parent_root))?;
        if anchor.slot() > boundary_slot {
            // The walk ran out of history before reaching the boundary.
            return Err(RegenError::UnknownBlock(anchor.parent_root()));
        }

        let anchor_state = self
            .get_checkpoint_state(Checkpoint {
                epoch: target_epoch,
                root: anchor.root(),
            })
            .await?;

        // Re-apply everything above the anchor, oldest first.
        chain.reverse();
        let state = self.replay_blocks(anchor_state, &chain[1..]).await?;
        debug!(
            block_root = %block.root(),
            anchor_slot = %anchor.slot(),
            replayed = chain.len() - 1,
            "Regenerated pre-state"
        );
        Ok(state)
    }

    /// Notify the regenerator that the finalized anchor advanced.
    ///
    /// Prunes both caches. In-flight queries rooted below the new anchor are
    /// allowed to complete but their results are no longer cached.
    pub fn on_finalized(&self, epoch: Epoch, block_root: Hash256, slot: Slot) {
        {
            let mut finalized = self.finalized.write();
            if epoch < finalized.epoch {
                warn!(
                    %epoch,
                    current = %finalized.epoch,
                    "Ignoring finalized anchor regression"
                );
                return;
            }
            *finalized = FinalizedAnchor {
                epoch,
                root: block_root,
                slot,
            };
        }

        let pruned_hot = {
            let mut cache = self.state_cache.lock();
            let pruned = cache.prune(slot);
            metrics::set_gauge(&metrics::HOT_CACHE_LEN, cache.len() as i64);
            pruned
        };
        let pruned_checkpoint = {
            let mut cache = self.checkpoint_cache.lock();
            let pruned = cache.prune_finalized(epoch);
            metrics::set_gauge(&metrics::CHECKPOINT_CACHE_LEN, cache.len() as i64);
            pruned
        };
        metrics::inc_counter_by(&metrics::PRUNED_HOT_STATES, pruned_hot as u64);
        metrics::inc_counter_by(&metrics::PRUNED_CHECKPOINT_STATES, pruned_checkpoint as u64);
        debug!(%epoch, %slot, pruned_hot, pruned_checkpoint, "Pruned regeneration caches");
    }

    /// Accept a state the block processor has just produced, so that a later
    /// query does not need to replay it.
    ///
    /// Best-effort: a donation failing the root consistency check is logged
    /// and dropped.
    pub fn submit_processed_state(&self, state_root: Hash256, state: T::State) {
        if state.state_root() != state_root {
            metrics::inc_counter(&metrics::DONATED_STATES_REJECTED);
            warn!(
                claimed = %state_root,
                observed = %state.state_root(),
                "Dropping donated state with mismatched root"
            );
            return;
        }
        metrics::inc_counter(&metrics::DONATED_STATES);
        self.insert_hot(Arc::new(state));
    }

    /// Request that the state with this root, should a replay produce it, be
    /// published into the hot cache.
    pub fn pin_state_root(&self, state_root: Hash256) {
        self.pinned_roots.lock().put(state_root, ());
    }

    pub fn finalized_anchor(&self) -> FinalizedAnchor {
        *self.finalized.read()
    }

    pub fn hot_cache_len(&self) -> usize {
        self.state_cache.lock().len()
    }

    pub fn checkpoint_cache_len(&self) -> usize {
        self.checkpoint_cache.lock().len()
    }

    /*
     * Workers. Each runs on a detached task owned by the coalescer entry for
     * its key.
     */

    async fn load_state_work(self: &Arc<Self>, state_root: Hash256) -> Outcome<T::State> {
        let store = self.state_source.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_state(state_root))
            .await
            .map_err(|_| RegenError::Cancelled)?;
        let state = Arc::new(loaded?);
        metrics::inc_counter(&metrics::COLD_LOADS);
        debug!(%state_root, slot = %state.slot(), "Loaded state from cold store");
        self.insert_hot(state.clone());
        Ok(state)
    }

    /// Returns `None` when the work was abandoned because no waiter remains;
    /// dropping the handle then wakes any late arrival to take over.
    async fn block_slot_state_work(
        self: &Arc<Self>,
        block: T::Block,
        slot: Slot,
        handle: &WorkHandle<WorkKey, Outcome<T::State>>,
    ) -> Option<Outcome<T::State>> {
        let _permit = match self.replay_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Some(Err(RegenError::Cancelled)),
        };
        // Everyone may have left while this work was queued for a permit.
        if !handle.has_waiters() {
            return None;
        }
        let base = match self.get_state(block.state_root()).await {
            Ok(base) => base,
            Err(e) => return Some(Err(e)),
        };
        let outcome = match self.advance_slots(base, slot).await {
            Ok(state) => {
                if slot.is_epoch_start(self.slots_per_epoch) {
                    let checkpoint = Checkpoint {
                        epoch: slot.epoch(self.slots_per_epoch),
                        root: block.root(),
                    };
                    self.insert_checkpoint(checkpoint, state.clone());
                }
                Ok(state)
            }
            Err(e) => Err(e),
        };
        Some(outcome)
    }

    /// Apply `blocks` (oldest first) on top of `state`, advancing empty slots
    /// before each block.
    async fn replay_blocks(
        self: &Arc<Self>,
        mut state: Arc<T::State>,
        blocks: &[T::Block],
    ) -> Outcome<T::State> {
        if blocks.is_empty() {
            return Ok(state);
        }
        let _permit = self
            .replay_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RegenError::Cancelled)?;
        let _timer = metrics::start_timer(&metrics::REPLAY_TIMES);
        for block in blocks {
            state = self.advance_slots(state, block.slot()).await?;
            state = Arc::new(
                self.transitioner
                    .process_block(&state, block)
                    .map_err(RegenError::from)?,
            );

            let on_boundary = block.slot().is_epoch_start(self.slots_per_epoch);
            let pinned = self.pinned_roots.lock().pop(&state.state_root()).is_some();
            if on_boundary || pinned {
                self.insert_hot(state.clone());
            }

            // A suspension point between blocks, so a dropped caller is
            // observed rather than replaying to the end.
            tokio::task::yield_now().await;
        }
        metrics::observe(&metrics::REPLAYED_BLOCKS, blocks.len() as f64);
        Ok(state)
    }

    /// Advance `state` through empty slots to `target_slot`, offloading to
    /// the CPU pool when the distance crosses the configured threshold.
    async fn advance_slots(
        self: &Arc<Self>,
        state: Arc<T::State>,
        target_slot: Slot,
    ) -> Outcome<T::State> {
        if state.slot() == target_slot {
            return Ok(state);
        }
        let distance = target_slot.as_u64().saturating_sub(state.slot().as_u64());
        let advanced = if distance > self.config.cpu_offload_threshold_slots {
            metrics::inc_counter(&metrics::PROCESS_SLOTS_OFFLOADED);
            let transitioner = self.transitioner.clone();
            let base = state.clone();
            self.rayon
                .spawn_replay(move || transitioner.process_slots(&base, target_slot))
                .await
                .ok_or(RegenError::Cancelled)??
        } else {
            self.transitioner.process_slots(&state, target_slot)?
        };
        Ok(Arc::new(advanced))
    }

    fn try_hot(&self, state_root: &Hash256) -> Option<Arc<T::State>> {
        let state = self.state_cache.lock().get(state_root);
        if state.is_some() {
            metrics::inc_counter(&metrics::HOT_CACHE_HITS);
        }
        state
    }

    fn try_checkpoint(&self, checkpoint: &Checkpoint) -> Option<Arc<T::State>> {
        let state = self.checkpoint_cache.lock().get(checkpoint);
        if state.is_some() {
            metrics::inc_counter(&metrics::CHECKPOINT_CACHE_HITS);
        }
        state
    }

    /// Checkpoint-cache lookup for a `(block_root, slot)` query that happens
    /// to sit on an epoch boundary.
    fn try_checkpoint_for_slot(&self, block_root: Hash256, slot: Slot) -> Option<Arc<T::State>> {
        if !slot.is_epoch_start(self.slots_per_epoch) {
            return None;
        }
        self.try_checkpoint(&Checkpoint {
            epoch: slot.epoch(self.slots_per_epoch),
            root: block_root,
        })
    }

    /// Publish into the hot cache, unless finalization has moved past the
    /// state while it was being computed.
    fn insert_hot(&self, state: Arc<T::State>) {
        if state.slot() < self.finalized.read().slot {
            return;
        }
        let mut cache = self.state_cache.lock();
        if let Some((evicted_root, _)) = cache.put(state) {
            debug!(%evicted_root, "Hot state cache full");
        }
        metrics::set_gauge(&metrics::HOT_CACHE_LEN, cache.len() as i64);
    }

    fn insert_checkpoint(&self, checkpoint: Checkpoint, state: Arc<T::State>) {
        if checkpoint.epoch < self.finalized.read().epoch {
            return;
        }
        let mut cache = self.checkpoint_cache.lock();
        if let Err(e) = cache.put(checkpoint, state) {
            warn!(%checkpoint, error = ?e, "Refusing misaligned checkpoint state");
        }
        metrics::set_gauge(&metrics::CHECKPOINT_CACHE_LEN, cache.len() as i64);
    }
}
