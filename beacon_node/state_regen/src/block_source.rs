use types::{Epoch, Hash256, Slot};

/// The fields of a block the regenerator is allowed to observe. Everything
/// else about the block is opaque and simply carried along into the
/// transitioner.
pub trait RegenBlock: Clone + Send + Sync + 'static {
    /// Root of this block.
    fn root(&self) -> Hash256;

    /// Root of the parent block. A plain key into the source's block arena,
    /// never an owning reference.
    fn parent_root(&self) -> Hash256;

    /// Root of the post-state this block commits to.
    fn state_root(&self) -> Hash256;

    fn slot(&self) -> Slot;
}

/// The current finalized anchor, as reported by fork choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizedAnchor {
    pub epoch: Epoch,
    pub root: Hash256,
    pub slot: Slot,
}

/// Read-only view over fork choice and the block database.
///
/// Implementations are internally thread-safe. Lookups may touch disk; the
/// regenerator drives the ancestor walk from a blocking-capable thread.
pub trait BlockSource: Send + Sync + 'static {
    type Block: RegenBlock;
    type AncestorsIter: Iterator<Item = Self::Block> + Send;

    /// Returns the block if it is currently in the non-pruned fork-choice
    /// subtree, otherwise `None`.
    fn get_block(&self, block_root: Hash256) -> Option<Self::Block>;

    /// Walk from `block_root` towards the finalized anchor.
    ///
    /// Yields the block identified by `block_root` first, then each parent in
    /// turn, ending (inclusive) with the first block whose slot is less than
    /// or equal to `stop_slot`. The walk ends early if a parent is unknown
    /// (pruned history); callers detect this from the slot of the final item.
    ///
    /// The sequence is deterministic for a given `(block_root, stop_slot)` at
    /// a given finalized anchor.
    fn ancestors(&self, block_root: Hash256, stop_slot: Slot) -> Self::AncestorsIter;

    fn finalized(&self) -> FinalizedAnchor;
}
