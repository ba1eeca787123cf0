//! Single-consumer ring-buffer dispatcher.
//!
//! Producers enqueue tasks into a bounded `RingBuffer`; one dedicated thread
//! runs them in enqueue order. A producer facing a full ring waits according
//! to its [`WaitStrategy`], optionally bounded by a timeout. The consumer
//! thread itself never waits on its own ring: when it submits to a full ring
//! the task goes to an unbounded overflow queue that the consumer drains
//! between batches.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    enter_context, is_current, next_dispatcher_id, run_task, DispatchError, Dispatcher,
    DispatcherConfig, DispatcherKind, RingBuffer, ShutdownPolicy, Task, WaitStrategy,
};

/// Tasks run per ring visit before the overflow queue is checked.
const BATCH: usize = 64;

/// Idle iterations spent spinning before yielding.
const SPIN_LIMIT: u32 = 64;

/// Idle iterations spent yielding before parking.
const YIELD_LIMIT: u32 = 1024;

/// Upper bound of a single park while idle.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

struct RingShared {
    id: u64,
    name: String,
    ring: RingBuffer<Task>,
    overflow: Mutex<VecDeque<Task>>,
    overflow_len: AtomicUsize,
    accepting: AtomicBool,
    running: AtomicBool,
    discard: AtomicBool,
    sleeping: AtomicBool,
    wait_strategy: WaitStrategy,
    producer_timeout: Option<Duration>,
    consumer: OnceLock<Thread>,
}

impl RingShared {
    fn wake_consumer(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
        if self.sleeping.load(Ordering::SeqCst) {
            if let Some(consumer) = self.consumer.get() {
                consumer.unpark();
            }
        }
    }

    fn pop_overflow(&self) -> Option<Task> {
        if self.overflow_len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let task = self.overflow.lock().pop_front();
        if task.is_some() {
            self.overflow_len.fetch_sub(1, Ordering::AcqRel);
        }
        task
    }

    fn push_overflow(&self, task: Task) {
        self.overflow.lock().push_back(task);
        self.overflow_len.fetch_add(1, Ordering::AcqRel);
    }

    fn is_drained(&self) -> bool {
        self.ring.is_empty() && self.overflow_len.load(Ordering::Acquire) == 0
    }

    fn idle(&self, spins: &mut u32) {
        *spins = spins.saturating_add(1);
        match self.wait_strategy {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::SpinYield if *spins <= SPIN_LIMIT => std::hint::spin_loop(),
            WaitStrategy::SpinYield if *spins <= YIELD_LIMIT => thread::yield_now(),
            WaitStrategy::SpinYield | WaitStrategy::Park => self.park(),
        }
    }

    fn park(&self) {
        self.sleeping.store(true, Ordering::SeqCst);
        if self.is_drained() && self.running.load(Ordering::SeqCst) {
            thread::park_timeout(PARK_TIMEOUT);
        }
        self.sleeping.store(false, Ordering::SeqCst);
    }

    fn discard_pending(&self) -> usize {
        let mut dropped = self.ring.pop_each(usize::MAX, drop);
        let mut overflow = self.overflow.lock();
        dropped += overflow.len();
        overflow.clear();
        self.overflow_len.store(0, Ordering::Release);
        dropped
    }
}

fn consume(shared: &RingShared) {
    enter_context(shared.id);
    let mut spins = 0u32;

    loop {
        if shared.discard.load(Ordering::Acquire) {
            let dropped = shared.discard_pending();
            if dropped > 0 {
                tracing::debug!(dispatcher = %shared.name, dropped, "discarded queued tasks");
            }
            break;
        }

        let mut ran = 0;
        while ran < BATCH && !shared.discard.load(Ordering::Acquire) {
            let Some(task) = shared.ring.pop() else {
                break;
            };
            run_task(&shared.name, task);
            ran += 1;
        }
        if !shared.discard.load(Ordering::Acquire) {
            if let Some(task) = shared.pop_overflow() {
                run_task(&shared.name, task);
                ran += 1;
            }
        }

        if ran > 0 {
            spins = 0;
            continue;
        }
        if !shared.running.load(Ordering::Acquire) && shared.is_drained() {
            break;
        }
        shared.idle(&mut spins);
    }
}

/// Dispatcher backed by a bounded ring and one consumer thread.
///
/// Tasks run strictly in the order they were accepted.
pub struct RingBufferDispatcher {
    shared: Arc<RingShared>,
    shutdown_policy: ShutdownPolicy,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RingBufferDispatcher {
    /// Starts a dispatcher and its consumer thread.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SpawnFailed`] if the thread cannot be spawned.
    pub fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let shared = Arc::new(RingShared {
            id: next_dispatcher_id(),
            name: config.name.clone(),
            ring: RingBuffer::new(config.effective_capacity()),
            overflow: Mutex::new(VecDeque::new()),
            overflow_len: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(true),
            discard: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            wait_strategy: config.wait_strategy,
            producer_timeout: config.producer_timeout,
            consumer: OnceLock::new(),
        });

        let consumer_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("riptide-{}", config.name))
            .spawn(move || consume(&consumer_shared))
            .map_err(|e| DispatchError::SpawnFailed {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;
        let _ = shared.consumer.set(handle.thread().clone());

        tracing::info!(
            dispatcher = %config.name,
            capacity = shared.ring.capacity(),
            wait_strategy = ?config.wait_strategy,
            "ring buffer dispatcher started"
        );

        Ok(Self {
            shared,
            shutdown_policy: config.shutdown_policy,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Ring capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    fn shut_down_error(&self) -> DispatchError {
        DispatchError::ShutDown {
            name: self.shared.name.clone(),
        }
    }

    fn wait_for_space(&self, attempts: &mut u32) {
        *attempts = attempts.saturating_add(1);
        match self.shared.wait_strategy {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::SpinYield => {
                if *attempts <= SPIN_LIMIT {
                    std::hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            WaitStrategy::Park => {
                let micros = (1u64 << (*attempts).min(6)).min(100);
                thread::sleep(Duration::from_micros(micros));
            }
        }
    }
}

impl Dispatcher for RingBufferDispatcher {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::RingBuffer
    }

    fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(self.shut_down_error());
        }

        if self.in_context() {
            if let Err(task) = self.shared.ring.push(task) {
                self.shared.push_overflow(task);
            }
            return Ok(());
        }

        let mut task = task;
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            match self.shared.ring.push(task) {
                Ok(()) => {
                    self.shared.wake_consumer();
                    return Ok(());
                }
                Err(back) => task = back,
            }

            if !self.shared.accepting.load(Ordering::Acquire) {
                return Err(self.shut_down_error());
            }
            if let Some(limit) = self.shared.producer_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(DispatchError::Timeout {
                        name: self.shared.name.clone(),
                        waited,
                    });
                }
            }
            self.shared.wake_consumer();
            self.wait_for_space(&mut attempts);
        }
    }

    fn in_context(&self) -> bool {
        is_current(self.shared.id)
    }

    fn backlog(&self) -> usize {
        self.shared.ring.len() + self.shared.overflow_len.load(Ordering::Relaxed)
    }

    fn is_alive(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.shutdown_policy == ShutdownPolicy::Discard {
            self.shared.discard.store(true, Ordering::Release);
        }
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            self.shared.running.store(false, Ordering::SeqCst);
            if let Some(consumer) = self.shared.consumer.get() {
                consumer.unpark();
            }
            tracing::info!(dispatcher = %self.shared.name, "ring buffer dispatcher stopping");
        }

        if self.in_context() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!(dispatcher = %self.shared.name, "consumer thread panicked");
            }
        }
    }
}

impl Drop for RingBufferDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RingBufferDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferDispatcher")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.ring.capacity())
            .field("backlog", &self.backlog())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
