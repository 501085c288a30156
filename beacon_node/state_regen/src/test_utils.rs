//! In-memory collaborators for exercising the regenerator without a full
//! client behind it.
//!
//! The mock transitioner derives state roots by hashing the predecessor root
//! with the slot or block being applied, so any two replays of the same chain
//! agree on every intermediate root and tests can assert replay equalities
//! without real consensus code. The mock sources count their calls, making
//! "exactly one load" and "zero transitions" directly assertable.

use crate::block_source::{BlockSource, FinalizedAnchor, RegenBlock};
use crate::config::RegenConfig;
use crate::regenerator::{RegenTypes, Regenerator};
use crate::state_source::{RegenState, StateSource, StateSourceError};
use crate::transitioner::{TransitionError, Transitioner};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use types::{Checkpoint, Epoch, Hash256, Slot};

pub const TEST_SLOTS_PER_EPOCH: u64 = 32;

/// Hash a domain tag and some byte strings into a root.
fn derive_root(tag: &str, parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for part in parts {
        hasher.update(part);
    }
    Hash256::from_slice(&hasher.finalize())
}

/// Root of the state obtained by advancing one slot to `slot`.
pub fn slot_advance_root(state_root: Hash256, slot: Slot) -> Hash256 {
    derive_root("slot", &[state_root.as_slice(), &slot.as_u64().to_le_bytes()])
}

/// Root of the post-state of applying the block with `block_root`.
pub fn block_post_root(pre_state_root: Hash256, block_root: Hash256) -> Hash256 {
    derive_root("block", &[pre_state_root.as_slice(), block_root.as_slice()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBlock {
    pub root: Hash256,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub slot: Slot,
}

impl RegenBlock for TestBlock {
    fn root(&self) -> Hash256 {
        self.root
    }

    fn parent_root(&self) -> Hash256 {
        self.parent_root
    }

    fn state_root(&self) -> Hash256 {
        self.state_root
    }

    fn slot(&self) -> Slot {
        self.slot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestState {
    pub state_root: Hash256,
    pub slot: Slot,
}

impl RegenState for TestState {
    fn slot(&self) -> Slot {
        self.slot
    }

    fn state_root(&self) -> Hash256 {
        self.state_root
    }
}

/// In-memory block tree with a finalized anchor.
#[derive(Default)]
pub struct TestBlockSource {
    blocks: RwLock<HashMap<Hash256, TestBlock>>,
    finalized: RwLock<FinalizedAnchor>,
}

impl TestBlockSource {
    pub fn insert_block(&self, block: TestBlock) {
        self.blocks.write().insert(block.root, block);
    }

    /// Drop a block, as fork-choice pruning would.
    pub fn remove_block(&self, block_root: &Hash256) {
        self.blocks.write().remove(block_root);
    }

    pub fn set_finalized(&self, anchor: FinalizedAnchor) {
        *self.finalized.write() = anchor;
    }
}

impl BlockSource for TestBlockSource {
    type Block = TestBlock;
    type AncestorsIter = std::vec::IntoIter<TestBlock>;

    fn get_block(&self, block_root: Hash256) -> Option<TestBlock> {
        self.blocks.read().get(&block_root).cloned()
    }

    fn ancestors(&self, block_root: Hash256, stop_slot: Slot) -> Self::AncestorsIter {
        let blocks = self.blocks.read();
        let mut chain = Vec::new();
        let mut current = blocks.get(&block_root).cloned();
        while let Some(block) = current {
            let slot = block.slot;
            let parent_root = block.parent_root;
            chain.push(block);
            if slot <= stop_slot {
                break;
            }
            current = blocks.get(&parent_root).cloned();
        }
        chain.into_iter()
    }

    fn finalized(&self) -> FinalizedAnchor {
        *self.finalized.read()
    }
}

/// In-memory state store that counts loads and can hold them open so tests
/// can observe queries mid-flight.
#[derive(Default)]
pub struct TestStateSource {
    states: RwLock<HashMap<Hash256, TestState>>,
    pub load_state_calls: AtomicUsize,
    gate_closed: StdMutex<bool>,
    gate: Condvar,
}

impl TestStateSource {
    pub fn insert_state(&self, state: TestState) {
        self.states.write().insert(state.state_root, state);
    }

    /// Make `load_state` block until `release_loads` is called.
    pub fn hold_loads(&self) {
        *self.gate_closed.lock().unwrap() = true;
    }

    pub fn release_loads(&self) {
        *self.gate_closed.lock().unwrap() = false;
        self.gate.notify_all();
    }

    fn wait_for_gate(&self) {
        let mut closed = self.gate_closed.lock().unwrap();
        while *closed {
            closed = self.gate.wait(closed).unwrap();
        }
    }
}

impl StateSource for TestStateSource {
    type State = TestState;

    fn load_state(&self, state_root: Hash256) -> Result<TestState, StateSourceError> {
        // Count before blocking on the gate, so a held load is observable.
        self.load_state_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate();
        self.states
            .read()
            .get(&state_root)
            .cloned()
            .ok_or(StateSourceError::StateNotPersisted(state_root))
    }
}

/// Deterministic transition function over the hash-chain state model.
#[derive(Default)]
pub struct TestTransitioner {
    pub process_slots_calls: AtomicUsize,
    pub process_block_calls: AtomicUsize,
}

impl Transitioner for TestTransitioner {
    type Block = TestBlock;
    type State = TestState;

    fn process_slots(
        &self,
        state: &TestState,
        target_slot: Slot,
    ) -> Result<TestState, TransitionError> {
        if target_slot < state.slot {
            return Err(TransitionError::TargetSlotBelowState {
                state_slot: state.slot,
                target_slot,
            });
        }
        self.process_slots_calls.fetch_add(1, Ordering::SeqCst);
        let mut slot = state.slot;
        let mut state_root = state.state_root;
        while slot < target_slot {
            slot += 1;
            state_root = slot_advance_root(state_root, slot);
        }
        Ok(TestState { state_root, slot })
    }

    fn process_block(
        &self,
        state: &TestState,
        block: &TestBlock,
    ) -> Result<TestState, TransitionError> {
        if state.slot != block.slot {
            return Err(TransitionError::BlockSlotMismatch {
                state_slot: state.slot,
                block_slot: block.slot,
            });
        }
        self.process_block_calls.fetch_add(1, Ordering::SeqCst);
        let observed = block_post_root(state.state_root, block.root);
        if observed != block.state_root {
            return Err(TransitionError::StateRootMismatch {
                expected: block.state_root,
                observed,
            });
        }
        Ok(TestState {
            state_root: observed,
            slot: state.slot,
        })
    }
}

/// Witness for the in-memory stack.
pub struct TestTypes;

impl RegenTypes for TestTypes {
    type Block = TestBlock;
    type State = TestState;
    type BlockSource = TestBlockSource;
    type StateSource = TestStateSource;
    type Transitioner = TestTransitioner;
}

/// A regenerator over the in-memory stack, plus the bookkeeping needed to
/// build consistent block trees: post-state roots are computed with the same
/// hash rules the mock transitioner applies during replay.
pub struct TestRig {
    pub regen: Arc<Regenerator<TestTypes>>,
    pub block_source: Arc<TestBlockSource>,
    pub state_source: Arc<TestStateSource>,
    pub transitioner: Arc<TestTransitioner>,
    post_states: Mutex<HashMap<Hash256, TestState>>,
    genesis_block: TestBlock,
    block_seq: AtomicU64,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_config(RegenConfig::default())
    }

    pub fn with_config(config: RegenConfig) -> Self {
        let genesis_state = TestState {
            state_root: derive_root("genesis", &[]),
            slot: Slot::new(0),
        };
        let genesis_block = TestBlock {
            root: derive_root("genesis_block", &[]),
            parent_root: Hash256::ZERO,
            state_root: genesis_state.state_root,
            slot: Slot::new(0),
        };

        let block_source = Arc::new(TestBlockSource::default());
        block_source.insert_block(genesis_block.clone());
        block_source.set_finalized(FinalizedAnchor {
            epoch: Epoch::new(0),
            root: genesis_block.root,
            slot: Slot::new(0),
        });

        let state_source = Arc::new(TestStateSource::default());
        state_source.insert_state(genesis_state.clone());

        let transitioner = Arc::new(TestTransitioner::default());
        let regen = Regenerator::new(
            block_source.clone(),
            state_source.clone(),
            transitioner.clone(),
            TEST_SLOTS_PER_EPOCH,
            config,
        );

        let mut post_states = HashMap::new();
        post_states.insert(genesis_block.root, genesis_state);

        Self {
            regen,
            block_source,
            state_source,
            transitioner,
            post_states: Mutex::new(post_states),
            genesis_block,
            block_seq: AtomicU64::new(0),
        }
    }

    pub fn genesis_block(&self) -> TestBlock {
        self.genesis_block.clone()
    }

    /// Create and register a block at `slot` on top of `parent_root`, with a
    /// post-state root consistent with the mock transitioner.
    pub fn add_block(&self, parent_root: Hash256, slot: Slot) -> TestBlock {
        let parent_post = self
            .post_states
            .lock()
            .get(&parent_root)
            .cloned()
            .expect("parent block must have been added first");
        assert!(slot > parent_post.slot, "block slot must exceed parent's");

        let mut pre_root = parent_post.state_root;
        let mut pre_slot = parent_post.slot;
        while pre_slot < slot {
            pre_slot += 1;
            pre_root = slot_advance_root(pre_root, pre_slot);
        }

        // A sequence number keeps sibling roots distinct.
        let seq = self.block_seq.fetch_add(1, Ordering::SeqCst);
        let block_root = derive_root(
            "block_root",
            &[
                parent_root.as_slice(),
                &slot.as_u64().to_le_bytes(),
                &seq.to_le_bytes(),
            ],
        );
        let state_root = block_post_root(pre_root, block_root);

        let block = TestBlock {
            root: block_root,
            parent_root,
            state_root,
            slot,
        };
        self.block_source.insert_block(block.clone());
        self.post_states.lock().insert(
            block_root,
            TestState {
                state_root,
                slot,
            },
        );
        block
    }

    /// Create a chain of blocks at the given slots, starting from
    /// `parent_root`.
    pub fn extend_chain(
        &self,
        parent_root: Hash256,
        slots: impl IntoIterator<Item = u64>,
    ) -> Vec<TestBlock> {
        let mut parent_root = parent_root;
        let mut chain = Vec::new();
        for slot in slots {
            let block = self.add_block(parent_root, Slot::new(slot));
            parent_root = block.root;
            chain.push(block);
        }
        chain
    }

    /// The post-state of a block added through this rig.
    pub fn post_state(&self, block_root: Hash256) -> TestState {
        self.post_states
            .lock()
            .get(&block_root)
            .cloned()
            .expect("block must have been added first")
    }

    /// Persist a block's post-state in the cold store.
    pub fn persist_post_state(&self, block_root: Hash256) {
        self.state_source.insert_state(self.post_state(block_root));
    }

    /// Hand a block's post-state to the regenerator, as the block processor
    /// would after importing the block.
    pub fn donate_post_state(&self, block_root: Hash256) {
        let state = self.post_state(block_root);
        self.regen.submit_processed_state(state.state_root, state);
    }

    /// Expected root of a block's post-state advanced to `slot`.
    pub fn expected_advanced_root(&self, block_root: Hash256, slot: Slot) -> Hash256 {
        let post = self.post_state(block_root);
        let mut state_root = post.state_root;
        let mut at = post.slot;
        while at < slot {
            at += 1;
            state_root = slot_advance_root(state_root, at);
        }
        state_root
    }

    /// Advance the finalized anchor to the first slot of `epoch`, rooted at
    /// `block_root`, on both the block source and the regenerator.
    pub fn finalize(&self, epoch: Epoch, block_root: Hash256) {
        let slot = epoch.start_slot(TEST_SLOTS_PER_EPOCH);
        self.block_source.set_finalized(FinalizedAnchor {
            epoch,
            root: block_root,
            slot,
        });
        self.regen.on_finalized(epoch, block_root, slot);
    }

    pub fn checkpoint(&self, epoch: u64, block_root: Hash256) -> Checkpoint {
        Checkpoint {
            epoch: Epoch::new(epoch),
            root: block_root,
        }
    }

    pub fn process_slots_calls(&self) -> usize {
        self.transitioner.process_slots_calls.load(Ordering::SeqCst)
    }

    pub fn process_block_calls(&self) -> usize {
        self.transitioner.process_block_calls.load(Ordering::SeqCst)
    }

    pub fn load_state_calls(&self) -> usize {
        self.state_source.load_state_calls.load(Ordering::SeqCst)
    }
}
