//! # Timer
//!
//! A dedicated thread firing scheduled callbacks.
//!
//! Registrations live in a min-heap ordered by deadline (ties broken by
//! registration order). The timer thread sleeps on a condition variable until
//! the earliest deadline, runs due callbacks outside the heap lock, and
//! re-arms periodic ones. Cancelled registrations are discarded lazily when
//! they reach the top of the heap.
//!
//! Time-driven operators (`buffer_timeout`, `throttle`, `take`) take a
//! [`Timer`] explicitly; an [`Environment`](crate::Environment) owns a shared
//! one.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Errors from the timer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The timer thread has stopped.
    #[error("timer '{0}' is shut down")]
    ShutDown(String),

    /// The timer thread could not be spawned.
    #[error("failed to spawn timer thread: {0}")]
    SpawnFailed(String),

    /// A periodic registration needs a non-zero period.
    #[error("timer period must be non-zero")]
    ZeroPeriod,
}

type Callback = Box<dyn FnMut() + Send>;

/// Handle to a scheduled callback.
#[derive(Debug, Clone)]
pub struct TimerRegistration {
    cancelled: Arc<AtomicBool>,
}

impl TimerRegistration {
    /// Prevents any future firing. A callback already running is not
    /// interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    period: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    running: bool,
}

struct TimerCore {
    name: String,
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
}

impl TimerCore {
    fn insert(
        &self,
        delay: Duration,
        period: Option<Duration>,
        callback: Callback,
    ) -> Result<TimerRegistration, TimerError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut queue = self.queue.lock();
        if !queue.running {
            return Err(TimerError::ShutDown(self.name.clone()));
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            period,
            cancelled: Arc::clone(&cancelled),
            callback,
        });
        drop(queue);
        self.wakeup.notify_one();
        Ok(TimerRegistration { cancelled })
    }

    fn run(&self) {
        let mut queue = self.queue.lock();
        loop {
            if !queue.running {
                break;
            }
            let now = Instant::now();
            let top = queue
                .heap
                .peek()
                .map(|e| (e.deadline, e.cancelled.load(Ordering::Acquire)));

            match top {
                None => {
                    self.wakeup.wait(&mut queue);
                }
                Some((_, true)) => {
                    // Callbacks are dropped outside the lock; they may own timer handles.
                    let stale = queue.heap.pop();
                    drop(queue);
                    drop(stale);
                    queue = self.queue.lock();
                }
                Some((deadline, false)) if deadline > now => {
                    let _ = self.wakeup.wait_until(&mut queue, deadline);
                }
                Some(_) => {
                    let Some(mut entry) = queue.heap.pop() else {
                        continue;
                    };
                    drop(queue);

                    let fired = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        (entry.callback)();
                    }));
                    if fired.is_err() {
                        tracing::error!(timer = %self.name, "timer callback panicked");
                    }

                    match entry.period {
                        Some(period) if !entry.cancelled.load(Ordering::Acquire) => {
                            queue = self.queue.lock();
                            entry.deadline += period;
                            entry.seq = queue.next_seq;
                            queue.next_seq += 1;
                            queue.heap.push(entry);
                        }
                        _ => {
                            drop(entry);
                            queue = self.queue.lock();
                        }
                    }
                }
            }
        }
        let pending = std::mem::take(&mut queue.heap);
        drop(queue);
        let dropped = pending.len();
        drop(pending);
        if dropped > 0 {
            tracing::debug!(timer = %self.name, dropped, "timer stopped with pending registrations");
        }
    }
}

struct TimerInner {
    core: Arc<TimerCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerInner {
    fn shutdown(&self) {
        {
            let mut queue = self.core.queue.lock();
            if !queue.running {
                return;
            }
            queue.running = false;
        }
        self.core.wakeup.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(timer = %self.core.name, "timer thread panicked");
            }
        }
        tracing::info!(timer = %self.core.name, "timer stopped");
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable handle to a timer thread.
///
/// The thread stops when [`shutdown`](Self::shutdown) is called or the last
/// handle is dropped.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Starts a timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::SpawnFailed`] if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> Result<Self, TimerError> {
        let name = name.into();
        let core = Arc::new(TimerCore {
            name: name.clone(),
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                running: true,
            }),
            wakeup: Condvar::new(),
        });

        let thread_core = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(format!("riptide-timer-{name}"))
            .spawn(move || thread_core.run())
            .map_err(|e| TimerError::SpawnFailed(e.to_string()))?;

        tracing::debug!(timer = %name, "timer started");
        Ok(Self {
            inner: Arc::new(TimerInner {
                core,
                thread: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Runs `callback` once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ShutDown`] if the timer has stopped.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<TimerRegistration, TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callback = Some(callback);
        self.inner.core.insert(
            delay,
            None,
            Box::new(move || {
                if let Some(callback) = callback.take() {
                    callback();
                }
            }),
        )
    }

    /// Runs `callback` every `period`, first after one period.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ZeroPeriod`] for a zero period and
    /// [`TimerError::ShutDown`] if the timer has stopped.
    pub fn schedule_periodic<F>(
        &self,
        period: Duration,
        callback: F,
    ) -> Result<TimerRegistration, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        self.inner.core.insert(period, Some(period), Box::new(callback))
    }

    /// Registrations waiting to fire, including cancelled ones not yet
    /// discarded.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.core.queue.lock().heap.len()
    }

    /// Returns true until shut down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.core.queue.lock().running
    }

    /// Stops the timer thread, discarding pending registrations.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.inner.core.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
