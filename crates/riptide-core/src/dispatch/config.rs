//! Dispatcher configuration types.

use std::str::FromStr;
use std::time::Duration;

use super::DispatchError;

/// Default ring buffer capacity, in tasks.
pub const DEFAULT_RING_CAPACITY: usize = 2048;

/// Minimum ring buffer capacity.
pub const MIN_RING_CAPACITY: usize = 4;

/// Maximum ring buffer capacity.
pub const MAX_RING_CAPACITY: usize = 1 << 20;

/// Execution strategy of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum DispatcherKind {
    /// Runs tasks on the submitting thread.
    Synchronous,
    /// One consumer thread fed by a bounded ring buffer. Preserves order.
    #[default]
    RingBuffer,
    /// Several worker threads sharing a queue. No ordering guarantee.
    WorkerPool,
}

impl DispatcherKind {
    /// Configuration name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synchronous => "sync",
            Self::RingBuffer => "ringBuffer",
            Self::WorkerPool => "workQueue",
        }
    }
}

impl FromStr for DispatcherKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" | "synchronous" => Ok(Self::Synchronous),
            "ringBuffer" | "ring_buffer" | "ring-buffer" => Ok(Self::RingBuffer),
            "workQueue" | "work_queue" | "worker-pool" | "workerPool" => Ok(Self::WorkerPool),
            other => Err(DispatchError::UnknownKind(other.to_string())),
        }
    }
}

/// How a thread waits when it has nothing to do, or when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Busy spin. Lowest latency, burns a core.
    Spin,

    /// Spin briefly, then yield to the scheduler.
    #[default]
    SpinYield,

    /// Park the thread until woken or a short timeout elapses.
    Park,
}

/// What happens to queued tasks on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Run every task already accepted, then stop.
    #[default]
    Drain,
    /// Drop tasks that have not started yet.
    Discard,
}

/// Configuration for a single dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Dispatcher name, also used for thread names.
    pub name: String,

    /// Execution strategy.
    pub kind: DispatcherKind,

    /// Ring capacity (rounded to a power of two). Ignored by other kinds.
    pub capacity: usize,

    /// Idle and backpressure wait strategy.
    pub wait_strategy: WaitStrategy,

    /// Worker threads for [`DispatcherKind::WorkerPool`].
    pub workers: usize,

    /// Queued task handling on shutdown.
    pub shutdown_policy: ShutdownPolicy,

    /// Upper bound for a producer blocked on a full ring. `None` waits forever.
    pub producer_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            kind: DispatcherKind::RingBuffer,
            capacity: DEFAULT_RING_CAPACITY,
            wait_strategy: WaitStrategy::SpinYield,
            workers: default_workers(),
            shutdown_policy: ShutdownPolicy::Drain,
            producer_timeout: None,
        }
    }
}

impl DispatcherConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }

    /// Returns the effective ring capacity (clamped, power of two).
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        self.capacity
            .clamp(MIN_RING_CAPACITY, MAX_RING_CAPACITY)
            .next_power_of_two()
    }
}

/// Builder for [`DispatcherConfig`].
#[derive(Debug, Default)]
pub struct DispatcherConfigBuilder {
    name: Option<String>,
    kind: Option<DispatcherKind>,
    capacity: Option<usize>,
    wait_strategy: Option<WaitStrategy>,
    workers: Option<usize>,
    shutdown_policy: Option<ShutdownPolicy>,
    producer_timeout: Option<Duration>,
}

impl DispatcherConfigBuilder {
    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the execution strategy.
    #[must_use]
    pub fn kind(mut self, kind: DispatcherKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the ring capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the wait strategy.
    #[must_use]
    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = Some(strategy);
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the shutdown policy.
    #[must_use]
    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = Some(policy);
        self
    }

    /// Bounds how long a producer may wait on a full ring.
    #[must_use]
    pub fn producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> DispatcherConfig {
        let defaults = DispatcherConfig::default();
        DispatcherConfig {
            name: self.name.unwrap_or(defaults.name),
            kind: self.kind.unwrap_or_default(),
            capacity: self
                .capacity
                .unwrap_or(DEFAULT_RING_CAPACITY)
                .clamp(MIN_RING_CAPACITY, MAX_RING_CAPACITY),
            wait_strategy: self.wait_strategy.unwrap_or_default(),
            workers: self.workers.unwrap_or(defaults.workers).max(1),
            shutdown_policy: self.shutdown_policy.unwrap_or_default(),
            producer_timeout: self.producer_timeout,
        }
    }
}

/// Number of worker threads used when none is configured.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}
