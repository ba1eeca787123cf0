//! Worker-pool dispatcher.
//!
//! N worker threads pull from one shared queue. Tasks submitted with
//! [`Dispatcher::dispatch_keyed`] are pinned to the worker selected by the
//! key's hash, so tasks sharing a key run one after another in submission
//! order. No other ordering is promised.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::{
    enter_context, is_current, next_dispatcher_id, run_task, DispatchError, Dispatcher,
    DispatcherConfig, DispatcherKind, ShutdownPolicy, Task,
};

struct PoolQueues {
    shared: VecDeque<Task>,
    pinned: Vec<VecDeque<Task>>,
    running: bool,
}

impl PoolQueues {
    fn len(&self) -> usize {
        self.shared.len() + self.pinned.iter().map(VecDeque::len).sum::<usize>()
    }

    fn next_for(&mut self, worker: usize) -> Option<Task> {
        self.pinned[worker]
            .pop_front()
            .or_else(|| self.shared.pop_front())
    }
}

struct PoolShared {
    id: u64,
    name: String,
    queues: Mutex<PoolQueues>,
    available: Condvar,
    accepting: AtomicBool,
}

fn work(shared: &PoolShared, worker: usize) {
    enter_context(shared.id);
    let mut queues = shared.queues.lock();
    loop {
        if let Some(task) = queues.next_for(worker) {
            drop(queues);
            run_task(&shared.name, task);
            queues = shared.queues.lock();
            continue;
        }
        if !queues.running {
            break;
        }
        shared.available.wait(&mut queues);
    }
}

/// Dispatcher running tasks on a fixed set of worker threads.
pub struct WorkerPoolDispatcher {
    shared: Arc<PoolShared>,
    shutdown_policy: ShutdownPolicy,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolDispatcher {
    /// Starts `config.workers` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SpawnFailed`] if a worker cannot be spawned.
    /// Workers spawned before the failure are stopped.
    pub fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let worker_count = config.workers.max(1);
        let shared = Arc::new(PoolShared {
            id: next_dispatcher_id(),
            name: config.name.clone(),
            queues: Mutex::new(PoolQueues {
                shared: VecDeque::new(),
                pinned: (0..worker_count).map(|_| VecDeque::new()).collect(),
                running: true,
            }),
            available: Condvar::new(),
            accepting: AtomicBool::new(true),
        });

        let pool = Self {
            shared,
            shutdown_policy: config.shutdown_policy,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
        };

        for worker in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("riptide-{}-{worker}", config.name))
                .spawn(move || work(&shared, worker))
                .map_err(|e| DispatchError::SpawnFailed {
                    name: config.name.clone(),
                    reason: e.to_string(),
                })?;
            pool.workers.lock().push(handle);
        }

        tracing::info!(
            dispatcher = %config.name,
            workers = worker_count,
            "worker pool dispatcher started"
        );
        Ok(pool)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.queues.lock().pinned.len()
    }

    fn shut_down_error(&self) -> DispatchError {
        DispatchError::ShutDown {
            name: self.shared.name.clone(),
        }
    }
}

impl Dispatcher for WorkerPoolDispatcher {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::WorkerPool
    }

    fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(self.shut_down_error());
        }
        self.shared.queues.lock().shared.push_back(task);
        self.shared.available.notify_one();
        Ok(())
    }

    fn dispatch_keyed(&self, key: u64, task: Task) -> Result<(), DispatchError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(self.shut_down_error());
        }
        {
            let mut queues = self.shared.queues.lock();
            let workers = queues.pinned.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            let slot = (fxhash::hash64(&key) % workers) as usize;
            queues.pinned[slot].push_back(task);
        }
        // The pinned worker may be any sleeper.
        self.shared.available.notify_all();
        Ok(())
    }

    fn in_context(&self) -> bool {
        is_current(self.shared.id)
    }

    fn backlog(&self) -> usize {
        self.shared.queues.lock().len()
    }

    fn is_alive(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            let mut queues = self.shared.queues.lock();
            if self.shutdown_policy == ShutdownPolicy::Discard {
                let dropped = queues.len();
                queues.shared.clear();
                queues.pinned.iter_mut().for_each(VecDeque::clear);
                if dropped > 0 {
                    tracing::debug!(dispatcher = %self.shared.name, dropped, "discarded queued tasks");
                }
            }
            queues.running = false;
            drop(queues);
            self.shared.available.notify_all();
            tracing::info!(dispatcher = %self.shared.name, "worker pool dispatcher stopping");
        }

        if self.in_context() {
            return;
        }
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(dispatcher = %self.shared.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPoolDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPoolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolDispatcher")
            .field("name", &self.shared.name)
            .field("workers", &self.worker_count())
            .field("backlog", &self.backlog())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pool(name: &str, workers: usize) -> WorkerPoolDispatcher {
        let config = DispatcherConfig::builder()
            .name(name)
            .kind(DispatcherKind::WorkerPool)
            .workers(workers)
            .build();
        WorkerPoolDispatcher::new(&config).unwrap()
    }

    #[test]
    fn test_runs_every_task() {
        let d = pool("all", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10_000 {
            let c = Arc::clone(&counter);
            d.dispatch(Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }
        d.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10_000);
    }

    #[test]
    fn test_uses_several_threads() {
        let d = pool("spread", 4);
        let (tx, rx) = mpsc::channel();
        let barrier = Arc::new(std::sync::Barrier::new(4));
        for _ in 0..4 {
            let tx = tx.clone();
            let barrier = Arc::clone(&barrier);
            d.dispatch(Box::new(move || {
                barrier.wait();
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();
        }
        let ids: HashSet<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_keyed_tasks_keep_order() {
        let d = pool("keyed", 4);
        let seen: Arc<Mutex<Vec<(u64, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..2_000 {
            let key = (i % 5) as u64;
            let seen = Arc::clone(&seen);
            d.dispatch_keyed(key, Box::new(move || seen.lock().push((key, i))))
                .unwrap();
        }
        d.shutdown();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2_000);
        for key in 0..5u64 {
            let order: Vec<usize> = seen
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, i)| *i)
                .collect();
            assert!(order.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_in_context_on_worker_threads() {
        let d = Arc::new(pool("ctx", 2));
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&d);
        d.dispatch(Box::new(move || tx.send(inner.in_context()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!d.in_context());
        d.shutdown();
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let d = pool("closed", 1);
        d.shutdown();
        assert!(matches!(
            d.dispatch(Box::new(|| {})),
            Err(DispatchError::ShutDown { .. })
        ));
        assert!(matches!(
            d.dispatch_keyed(1, Box::new(|| {})),
            Err(DispatchError::ShutDown { .. })
        ));
    }
}
