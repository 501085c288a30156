use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::error;

const DEFAULT_REPLAY_POOL_DIVISOR: usize = 2;
const MINIMUM_REPLAY_POOL_THREADS: usize = 1;

/// Owns the thread pool on which slot and block transitions run when they are
/// too large to execute inline on the async executor.
/// By default ~50% of CPUs or a minimum of 1 thread.
pub struct RayonManager {
    replay_threadpool: Arc<ThreadPool>,
}

impl Default for RayonManager {
    fn default() -> Self {
        let replay_threads =
            (num_cpus::get() / DEFAULT_REPLAY_POOL_DIVISOR).max(MINIMUM_REPLAY_POOL_THREADS);
        let replay_threadpool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(replay_threads)
                // A panicking transition must not take the process down; the
                // waiting query observes a dropped result channel instead.
                .panic_handler(|_| error!("replay worker panicked"))
                .build()
                .expect("failed to build replay rayon pool"),
        );
        Self { replay_threadpool }
    }
}

impl RayonManager {
    /// Run `work` on the replay pool, resolving once it completes.
    ///
    /// Returns `None` if the work was torn down before producing a result
    /// (e.g. it panicked or the process is shutting down).
    pub async fn spawn_replay<F, R>(&self, work: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.replay_threadpool.spawn(move || {
            let _ = result_tx.send(work());
        });
        result_rx.await.ok()
    }
}
