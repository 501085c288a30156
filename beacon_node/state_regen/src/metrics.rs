pub use metrics::*;
use std::sync::LazyLock;

/*
 * Cache effectiveness
 */
pub static HOT_CACHE_HITS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_hot_state_cache_hits",
        "Number of state queries served by the hot state cache",
    )
});
pub static HOT_CACHE_MISSES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_hot_state_cache_misses",
        "Number of state queries that missed the hot state cache",
    )
});
pub static CHECKPOINT_CACHE_HITS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_checkpoint_state_cache_hits",
        "Number of queries served by the checkpoint state cache",
    )
});
pub static CHECKPOINT_CACHE_MISSES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_checkpoint_state_cache_misses",
        "Number of checkpoint queries that missed the checkpoint state cache",
    )
});
pub static HOT_CACHE_LEN: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "regen_hot_state_cache_len",
        "Number of states currently in the hot state cache",
    )
});
pub static CHECKPOINT_CACHE_LEN: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "regen_checkpoint_state_cache_len",
        "Number of states currently in the checkpoint state cache",
    )
});

/*
 * Work performed
 */
pub static COLD_LOADS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_cold_loads",
        "Number of states loaded from the persistent store",
    )
});
pub static COALESCED_JOINS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_coalesced_joins",
        "Number of queries that attached to already-running work",
    )
});
pub static PROCESS_SLOTS_OFFLOADED: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_process_slots_offloaded",
        "Number of slot-advance runs executed on the CPU pool",
    )
});
pub static REPLAYED_BLOCKS: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "regen_replayed_blocks",
        "Number of blocks re-applied per replay",
    )
});
pub static REPLAY_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram("regen_replay_seconds", "Time taken to replay blocks")
});

/*
 * Donations and pruning
 */
pub static DONATED_STATES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_donated_states",
        "Number of states accepted from the block processor",
    )
});
pub static DONATED_STATES_REJECTED: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_donated_states_rejected",
        "Number of donated states rejected by the consistency check",
    )
});
pub static PRUNED_HOT_STATES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_pruned_hot_states",
        "Number of hot states removed by finalization pruning",
    )
});
pub static PRUNED_CHECKPOINT_STATES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_pruned_checkpoint_states",
        "Number of checkpoint states removed by finalization pruning",
    )
});
