//! # Dispatchers
//!
//! Execution contexts that run scheduled tasks.
//!
//! ```text
//!  producers ──dispatch()──▶ ┌──────────────────────────┐
//!                            │ Synchronous: caller runs │
//!                            ├──────────────────────────┤
//!                            │ RingBuffer: [t|t|t|t|..] │──▶ 1 consumer thread (FIFO)
//!                            ├──────────────────────────┤
//!                            │ WorkerPool: shared queue │──▶ N workers (unordered)
//!                            │   + per-key pinned queues│
//!                            └──────────────────────────┘
//! ```
//!
//! | Kind | Threads | Ordering | Producer blocks |
//! |------|---------|----------|-----------------|
//! | [`SynchronousDispatcher`] | caller | call order | never |
//! | [`RingBufferDispatcher`] | 1 | submission order | when the ring is full |
//! | [`WorkerPoolDispatcher`] | N | per key only | never |
//!
//! A [`DispatcherSupplier`] hands out a fixed set of homogeneous dispatchers
//! round-robin.

mod cache_padded;
mod config;
mod ring;
mod ring_buffer;
mod supplier;
mod sync;
mod worker_pool;

pub(crate) use cache_padded::CachePadded;
pub use config::{
    default_workers, DispatcherConfig, DispatcherConfigBuilder, DispatcherKind, ShutdownPolicy,
    WaitStrategy, DEFAULT_RING_CAPACITY, MAX_RING_CAPACITY, MIN_RING_CAPACITY,
};
pub use ring::RingBufferDispatcher;
pub(crate) use ring_buffer::RingBuffer;
pub use supplier::DispatcherSupplier;
pub use sync::SynchronousDispatcher;
pub use worker_pool::WorkerPoolDispatcher;

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A unit of work submitted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned when submitting to a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher no longer accepts tasks.
    #[error("dispatcher '{name}' is shut down")]
    ShutDown {
        /// Dispatcher name.
        name: String,
    },

    /// A producer waited on a full ring longer than the configured timeout.
    #[error("dispatcher '{name}' stayed full for {waited:?}")]
    Timeout {
        /// Dispatcher name.
        name: String,
        /// How long the producer waited.
        waited: Duration,
    },

    /// A dispatcher thread could not be spawned.
    #[error("failed to spawn thread for dispatcher '{name}': {reason}")]
    SpawnFailed {
        /// Dispatcher name.
        name: String,
        /// OS error text.
        reason: String,
    },

    /// Configuration named a dispatcher kind that does not exist.
    #[error("unknown dispatcher kind '{0}'")]
    UnknownKind(String),

    /// A dispatcher pool was built without any dispatchers.
    #[error("dispatcher pool '{name}' is empty")]
    EmptyPool {
        /// Pool name.
        name: String,
    },
}

/// An execution context for tasks.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Dispatcher name.
    fn name(&self) -> &str;

    /// Execution strategy.
    fn kind(&self) -> DispatcherKind;

    /// Submits a task.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutDown`] after shutdown and
    /// [`DispatchError::Timeout`] if a bounded producer wait elapsed.
    fn dispatch(&self, task: Task) -> Result<(), DispatchError>;

    /// Submits a task whose ordering must be preserved relative to other
    /// tasks with the same key.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch).
    fn dispatch_keyed(&self, key: u64, task: Task) -> Result<(), DispatchError> {
        let _ = key;
        self.dispatch(task)
    }

    /// Returns true if the calling thread is one of this dispatcher's threads.
    fn in_context(&self) -> bool;

    /// Approximate number of tasks accepted but not yet started.
    fn backlog(&self) -> usize;

    /// Returns true until [`shutdown`](Self::shutdown) is called.
    fn is_alive(&self) -> bool;

    /// Stops accepting tasks, handles queued tasks per the shutdown policy and
    /// joins the dispatcher threads.
    fn shutdown(&self);
}

/// Creates a dispatcher from configuration.
///
/// # Errors
///
/// Returns [`DispatchError::SpawnFailed`] if a dispatcher thread could not be
/// spawned.
pub fn from_config(config: &DispatcherConfig) -> Result<Arc<dyn Dispatcher>, DispatchError> {
    Ok(match config.kind {
        DispatcherKind::Synchronous => Arc::new(SynchronousDispatcher::new(config.name.clone())),
        DispatcherKind::RingBuffer => Arc::new(RingBufferDispatcher::new(config)?),
        DispatcherKind::WorkerPool => Arc::new(WorkerPoolDispatcher::new(config)?),
    })
}

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_DISPATCHER: Cell<u64> = const { Cell::new(0) };
}

/// Allocates an id used to recognise a dispatcher's own threads.
pub(crate) fn next_dispatcher_id() -> u64 {
    NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Marks the current thread as owned by dispatcher `id`.
pub(crate) fn enter_context(id: u64) {
    CURRENT_DISPATCHER.with(|c| c.set(id));
}

/// Returns true if the current thread is owned by dispatcher `id`.
pub(crate) fn is_current(id: u64) -> bool {
    CURRENT_DISPATCHER.with(|c| c.get() == id)
}

/// Runs a task, logging instead of unwinding through the dispatcher thread.
pub(crate) fn run_task(dispatcher: &str, task: Task) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
        tracing::error!(dispatcher, "task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_from_config_builds_each_kind() {
        for kind in [
            DispatcherKind::Synchronous,
            DispatcherKind::RingBuffer,
            DispatcherKind::WorkerPool,
        ] {
            let config = DispatcherConfig::builder()
                .name(kind.as_str())
                .kind(kind)
                .workers(2)
                .build();
            let dispatcher = from_config(&config).unwrap();
            assert_eq!(dispatcher.kind(), kind);
            assert_eq!(dispatcher.name(), kind.as_str());

            let counter = Arc::new(AtomicUsize::new(0));
            let (tx, rx) = std::sync::mpsc::channel();
            let c = Arc::clone(&counter);
            dispatcher
                .dispatch(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    tx.send(()).unwrap();
                }))
                .unwrap();
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), 1);
            dispatcher.shutdown();
            assert!(!dispatcher.is_alive());
        }
    }

    #[test]
    fn test_panicking_task_does_not_kill_dispatcher() {
        let config = DispatcherConfig::builder().name("panicky").build();
        let dispatcher = from_config(&config).unwrap();
        dispatcher.dispatch(Box::new(|| panic!("boom"))).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        dispatcher
            .dispatch(Box::new(move || tx.send(7).unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        dispatcher.shutdown();
    }
}
