//! End-to-end tests of the regenerator over the in-memory test stack.

use state_regen::test_utils::{TEST_SLOTS_PER_EPOCH, TestBlock, TestRig, TestState};
use state_regen::{RegenConfig, RegenError, TransitionError};
use std::sync::Arc;
use std::time::Duration;
use types::{Epoch, Hash256, Slot};

/// Poll `condition` until it holds, panicking if it takes unreasonably long.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn hot_hit_via_donation() {
    let rig = TestRig::new();
    let state = TestState {
        state_root: Hash256::repeat_byte(0xaa),
        slot: Slot::new(1),
    };

    rig.regen
        .submit_processed_state(state.state_root, state.clone());

    let got = rig.regen.get_state(state.state_root).await.unwrap();
    assert_eq!(*got, state);
    assert_eq!(rig.load_state_calls(), 0, "store must not be touched");
}

#[tokio::test]
async fn donation_with_mismatched_root_is_rejected() {
    let rig = TestRig::new();
    let state = TestState {
        state_root: Hash256::repeat_byte(0xaa),
        slot: Slot::new(1),
    };

    rig.regen
        .submit_processed_state(Hash256::repeat_byte(0xbb), state);

    assert_eq!(rig.regen.hot_cache_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_load_is_coalesced() {
    let rig = TestRig::new();
    let state_root = rig.post_state(rig.genesis_block().root).state_root;

    rig.state_source.hold_loads();

    let first = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_state(state_root).await }
    });
    wait_until(|| rig.load_state_calls() == 1).await;

    let second = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_state(state_root).await }
    });
    // Give the second query every chance to issue a (wrong) duplicate load.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(rig.load_state_calls(), 1);

    rig.state_source.release_loads();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.state_root, state_root);
    assert!(
        Arc::ptr_eq(&first, &second),
        "coalesced callers observe the same state"
    );
    assert_eq!(rig.load_state_calls(), 1, "store observed exactly one load");
}

#[tokio::test(flavor = "multi_thread")]
async fn coalesced_failure_is_not_cached() {
    let rig = TestRig::new();
    let missing = Hash256::repeat_byte(0xcc);

    rig.state_source.hold_loads();
    let first = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_state(missing).await }
    });
    wait_until(|| rig.load_state_calls() == 1).await;
    let second = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_state(missing).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    rig.state_source.release_loads();

    assert_eq!(
        first.await.unwrap(),
        Err(RegenError::StateNotAvailable(missing))
    );
    assert_eq!(
        second.await.unwrap(),
        Err(RegenError::StateNotAvailable(missing))
    );
    assert_eq!(rig.load_state_calls(), 1);

    // Failures are not cached; a later caller re-attempts the load.
    assert_eq!(
        rig.regen.get_state(missing).await,
        Err(RegenError::StateNotAvailable(missing))
    );
    assert_eq!(rig.load_state_calls(), 2);
}

#[tokio::test]
async fn get_state_returns_same_identity() {
    let rig = TestRig::new();
    let state_root = rig.post_state(rig.genesis_block().root).state_root;

    let first = rig.regen.get_state(state_root).await.unwrap();
    let second = rig.regen.get_state(state_root).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test]
async fn checkpoint_materialization() {
    let rig = TestRig::new();
    let block = rig.add_block(rig.genesis_block().root, Slot::new(95));
    rig.persist_post_state(block.root);

    let checkpoint = rig.checkpoint(3, block.root);
    let state = rig.regen.get_checkpoint_state(checkpoint).await.unwrap();

    assert_eq!(state.slot, Slot::new(96));
    assert_eq!(
        state.state_root,
        rig.expected_advanced_root(block.root, Slot::new(96))
    );
    assert_eq!(rig.process_slots_calls(), 1);

    // The second call is a cache hit; the transitioner is not invoked again.
    let again = rig.regen.get_checkpoint_state(checkpoint).await.unwrap();
    assert!(Arc::ptr_eq(&state, &again));
    assert_eq!(rig.process_slots_calls(), 1);
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test]
async fn checkpoint_materialization_with_offload() {
    let config = RegenConfig {
        // Force every slot advance onto the CPU pool.
        cpu_offload_threshold_slots: 0,
        ..RegenConfig::default()
    };
    let rig = TestRig::with_config(config);
    let block = rig.add_block(rig.genesis_block().root, Slot::new(95));
    rig.persist_post_state(block.root);

    let state = rig
        .regen
        .get_checkpoint_state(rig.checkpoint(3, block.root))
        .await
        .unwrap();

    assert_eq!(state.slot, Slot::new(96));
    assert_eq!(
        state.state_root,
        rig.expected_advanced_root(block.root, Slot::new(96))
    );
}

#[tokio::test]
async fn block_slot_state_at_block_slot_is_identity() {
    let rig = TestRig::new();
    let block = rig.add_block(rig.genesis_block().root, Slot::new(5));
    rig.persist_post_state(block.root);

    let state = rig
        .regen
        .get_block_slot_state(block.root, Slot::new(5))
        .await
        .unwrap();

    assert_eq!(state.state_root, block.state_root);
    assert_eq!(state.slot, block.slot);
    assert_eq!(rig.process_slots_calls(), 0, "no slots were advanced");
}

#[tokio::test]
async fn block_slot_state_below_block_slot_is_invalid() {
    let rig = TestRig::new();
    let block = rig.add_block(rig.genesis_block().root, Slot::new(5));

    let err = rig
        .regen
        .get_block_slot_state(block.root, Slot::new(4))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RegenError::InvalidSlot {
            block_slot: Slot::new(5),
            requested_slot: Slot::new(4),
        }
    );
}

#[tokio::test]
async fn unknown_block_is_rejected() {
    let rig = TestRig::new();
    let missing = Hash256::repeat_byte(0xdd);

    assert_eq!(
        rig.regen
            .get_block_slot_state(missing, Slot::new(1))
            .await
            .unwrap_err(),
        RegenError::UnknownBlock(missing)
    );
}

#[tokio::test]
async fn pre_state_reuses_checkpoint_anchor() {
    let rig = TestRig::new();
    let anchor = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.persist_post_state(anchor.root);
    let chain = rig.extend_chain(anchor.root, 65..=68);
    let parent = chain.last().unwrap().clone();

    let block = rig.add_block(parent.root, Slot::new(69));
    let pre = rig.regen.get_pre_state(&block).await.unwrap();

    assert_eq!(pre.slot, parent.slot);
    assert_eq!(pre.state_root, parent.state_root);
    assert_eq!(rig.process_block_calls(), 4, "exactly B1..B4 are replayed");
    // One slot advance per replayed block; the anchor state already sat on
    // the boundary.
    assert_eq!(rig.process_slots_calls(), 4);

    // A sibling shares the anchor: the checkpoint state is not recomputed,
    // the four blocks are replayed again.
    let sibling = rig.add_block(parent.root, Slot::new(69));
    assert_ne!(sibling.root, block.root);
    let sibling_pre = rig.regen.get_pre_state(&sibling).await.unwrap();

    assert_eq!(sibling_pre.state_root, pre.state_root);
    assert_eq!(rig.process_block_calls(), 8);
    assert_eq!(rig.process_slots_calls(), 8);
    assert_eq!(rig.load_state_calls(), 1, "anchor state loaded only once");
}

#[tokio::test]
async fn pre_state_of_child_of_finalized_boundary_block() {
    let rig = TestRig::new();
    let anchor = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.persist_post_state(anchor.root);
    rig.finalize(Epoch::new(2), anchor.root);

    let child = rig.add_block(anchor.root, Slot::new(65));
    let pre = rig.regen.get_pre_state(&child).await.unwrap();

    // The parent sits exactly on the boundary, so the pre-state is its own
    // post-state, untouched.
    assert_eq!(pre.state_root, anchor.state_root);
    assert_eq!(pre.slot, Slot::new(64));
    assert_eq!(rig.process_block_calls(), 0);
}

#[tokio::test]
async fn pre_state_with_pruned_history_fails() {
    let rig = TestRig::new();
    let anchor = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.persist_post_state(anchor.root);
    let chain = rig.extend_chain(anchor.root, 65..=68);
    let block = rig.add_block(chain.last().unwrap().root, Slot::new(69));

    // Fork choice pruned the anchor out from under us.
    rig.block_source.remove_block(&anchor.root);

    assert_eq!(
        rig.regen.get_pre_state(&block).await.unwrap_err(),
        RegenError::UnknownBlock(anchor.root)
    );
}

#[tokio::test]
async fn pinned_roots_are_cached_during_replay() {
    let rig = TestRig::new();
    let anchor = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.persist_post_state(anchor.root);
    let chain = rig.extend_chain(anchor.root, 65..=68);
    let block = rig.add_block(chain.last().unwrap().root, Slot::new(69));

    // Ask for B2's post-state to be kept around.
    let pinned_root = chain[1].state_root;
    rig.regen.pin_state_root(pinned_root);

    rig.regen.get_pre_state(&block).await.unwrap();

    // Served from the hot cache; only the anchor was ever cold-loaded.
    let pinned = rig.regen.get_state(pinned_root).await.unwrap();
    assert_eq!(pinned.state_root, pinned_root);
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test]
async fn transition_failure_is_reported_and_not_cached() {
    let rig = TestRig::new();
    let anchor = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.persist_post_state(anchor.root);
    let good = rig.add_block(anchor.root, Slot::new(65));

    // A block whose committed state root cannot result from applying it.
    let bad = TestBlock {
        root: Hash256::repeat_byte(0xbb),
        parent_root: good.root,
        state_root: Hash256::repeat_byte(0xee),
        slot: Slot::new(66),
    };
    rig.block_source.insert_block(bad.clone());
    let child = TestBlock {
        root: Hash256::repeat_byte(0xcd),
        parent_root: bad.root,
        state_root: Hash256::repeat_byte(0xef),
        slot: Slot::new(67),
    };
    rig.block_source.insert_block(child.clone());

    let err = rig.regen.get_pre_state(&child).await.unwrap_err();
    assert!(matches!(
        err,
        RegenError::Transition(TransitionError::StateRootMismatch { .. })
    ));

    // Nothing from the failed replay was published; only the cold-loaded
    // anchor state is resident.
    assert_eq!(rig.regen.hot_cache_len(), 1);
}

#[tokio::test]
async fn finalization_prunes_caches() {
    let rig = TestRig::new();
    let a = rig.add_block(rig.genesis_block().root, Slot::new(30));
    let b = rig.add_block(a.root, Slot::new(64));
    let c = rig.add_block(b.root, Slot::new(96));
    rig.donate_post_state(a.root);
    rig.donate_post_state(b.root);
    rig.donate_post_state(c.root);
    assert_eq!(rig.regen.hot_cache_len(), 3);

    rig.finalize(Epoch::new(3), c.root);

    assert_eq!(rig.regen.hot_cache_len(), 1);
    assert_eq!(rig.regen.finalized_anchor().slot, Slot::new(96));

    // Queries for the pruned roots now fall through to the store.
    let pruned_root = rig.post_state(a.root).state_root;
    assert_eq!(
        rig.regen.get_state(pruned_root).await.unwrap_err(),
        RegenError::StateNotAvailable(pruned_root)
    );
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test]
async fn finalization_regression_is_ignored() {
    let rig = TestRig::new();
    let a = rig.add_block(rig.genesis_block().root, Slot::new(64));
    rig.finalize(Epoch::new(2), a.root);

    rig.regen
        .on_finalized(Epoch::new(1), a.root, Slot::new(32));

    assert_eq!(rig.regen.finalized_anchor().epoch, Epoch::new(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_checkpoint_queries_observe_identical_state() {
    let rig = TestRig::new();
    let block = rig.add_block(rig.genesis_block().root, Slot::new(95));
    rig.persist_post_state(block.root);
    let checkpoint = rig.checkpoint(3, block.root);

    rig.state_source.hold_loads();
    let first = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_checkpoint_state(checkpoint).await }
    });
    wait_until(|| rig.load_state_calls() == 1).await;
    let second = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_checkpoint_state(checkpoint).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    rig.state_source.release_loads();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.state_root, second.state_root);
    assert_eq!(rig.process_slots_calls(), 1);
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn work_survives_waiter_cancellation() {
    let rig = TestRig::new();
    let state_root = rig.post_state(rig.genesis_block().root).state_root;

    rig.state_source.hold_loads();
    let query = tokio::spawn({
        let regen = rig.regen.clone();
        async move { regen.get_state(state_root).await }
    });
    wait_until(|| rig.load_state_calls() == 1).await;

    // The only caller gives up, but the load is already in flight and its
    // result is still published.
    query.abort();
    rig.state_source.release_loads();
    wait_until(|| rig.regen.hot_cache_len() == 1).await;

    let state = rig.regen.get_state(state_root).await.unwrap();
    assert_eq!(state.state_root, state_root);
    assert_eq!(rig.load_state_calls(), 1);
}

#[tokio::test]
async fn checkpoint_cache_respects_bound() {
    let config = RegenConfig {
        max_checkpoint_states: 2,
        ..RegenConfig::default()
    };
    let rig = TestRig::with_config(config);

    let mut parent = rig.genesis_block().root;
    for epoch in 1..=4_u64 {
        let slot = epoch * TEST_SLOTS_PER_EPOCH - 1;
        let block = rig.add_block(parent, Slot::new(slot));
        rig.persist_post_state(block.root);
        rig.regen
            .get_checkpoint_state(rig.checkpoint(epoch, block.root))
            .await
            .unwrap();
        parent = block.root;
    }

    assert!(rig.regen.checkpoint_cache_len() <= 2);
}
