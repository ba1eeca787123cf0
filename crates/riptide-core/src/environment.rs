//! Runtime environment: named dispatchers, a cached dispatcher pool and a
//! shared timer.
//!
//! An [`Environment`] is an explicit value. Create one at startup, hand
//! clones to whatever builds pipelines and call
//! [`shutdown`](Environment::shutdown) when done.
//!
//! | Name | Kind |
//! |------|------|
//! | `"sync"` | [`SynchronousDispatcher`] |
//! | `"shared"` | [`RingBufferDispatcher`] |
//! | `"workQueue"` | [`WorkerPoolDispatcher`] |
//!
//! [`SynchronousDispatcher`]: crate::dispatch::SynchronousDispatcher
//! [`RingBufferDispatcher`]: crate::dispatch::RingBufferDispatcher
//! [`WorkerPoolDispatcher`]: crate::dispatch::WorkerPoolDispatcher

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};

use crate::dispatch::{
    self, default_workers, DispatchError, Dispatcher, DispatcherConfig, DispatcherKind,
    DispatcherSupplier, WaitStrategy, DEFAULT_RING_CAPACITY,
};
use crate::timer::{Timer, TimerError};

/// Name of the synchronous dispatcher.
pub const SYNC_DISPATCHER: &str = "sync";
/// Name of the shared ring-buffer dispatcher.
pub const SHARED_DISPATCHER: &str = "shared";
/// Name of the worker-pool dispatcher.
pub const WORK_QUEUE_DISPATCHER: &str = "workQueue";

/// Errors from environment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// A dispatcher could not be created.
    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The timer thread could not be started.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    /// No dispatcher is registered under the name.
    #[error("dispatcher '{0}' not found")]
    UnknownDispatcher(String),

    /// A dispatcher is already registered under the name.
    #[error("dispatcher '{0}' already exists")]
    DuplicateDispatcher(String),

    /// The configuration is not usable.
    #[error("invalid environment configuration: {0}")]
    InvalidConfig(String),

    /// The environment was shut down.
    #[error("environment is shut down")]
    ShutDown,
}

/// Configuration for an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Ring capacity of the shared and cached dispatchers.
    pub ring_capacity: usize,
    /// Wait strategy of the shared and cached dispatchers.
    pub wait_strategy: WaitStrategy,
    /// Threads of the `workQueue` dispatcher.
    pub workers: usize,
    /// Number of ring-buffer dispatchers in the cached pool.
    pub cached_pool_size: usize,
    /// Additional dispatchers, registered under their configured names.
    pub dispatchers: Vec<DispatcherConfig>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            wait_strategy: WaitStrategy::SpinYield,
            workers: default_workers(),
            cached_pool_size: default_workers(),
            dispatchers: Vec::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> EnvironmentConfigBuilder {
        EnvironmentConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), EnvironmentError> {
        if self.cached_pool_size == 0 {
            return Err(EnvironmentError::InvalidConfig(
                "cached_pool_size must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(EnvironmentError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`EnvironmentConfig`].
#[derive(Debug, Default)]
pub struct EnvironmentConfigBuilder {
    config: EnvironmentConfig,
}

impl EnvironmentConfigBuilder {
    /// Sets the ring capacity of the shared and cached dispatchers.
    #[must_use]
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    /// Sets the wait strategy of the shared and cached dispatchers.
    #[must_use]
    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.config.wait_strategy = strategy;
        self
    }

    /// Sets the `workQueue` thread count.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Sets the cached pool size.
    #[must_use]
    pub fn cached_pool_size(mut self, size: usize) -> Self {
        self.config.cached_pool_size = size;
        self
    }

    /// Adds a named dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.config.dispatchers.push(config);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> EnvironmentConfig {
        self.config
    }
}

struct EnvironmentInner {
    dispatchers: RwLock<FxHashMap<String, Arc<dyn Dispatcher>>>,
    cached: DispatcherSupplier,
    pools: Mutex<Vec<DispatcherSupplier>>,
    timer: Timer,
    alive: AtomicBool,
}

/// Registry of dispatchers plus a shared timer.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl Environment {
    /// Starts the built-in dispatchers, the cached pool and the timer.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::InvalidConfig`] for a zero pool or worker
    /// count, [`EnvironmentError::DuplicateDispatcher`] if an extra
    /// dispatcher reuses a name, and thread spawn failures.
    pub fn new(config: EnvironmentConfig) -> Result<Self, EnvironmentError> {
        config.validate()?;

        let shared = DispatcherConfig::builder()
            .name(SHARED_DISPATCHER)
            .kind(DispatcherKind::RingBuffer)
            .capacity(config.ring_capacity)
            .wait_strategy(config.wait_strategy)
            .build();
        let work_queue = DispatcherConfig::builder()
            .name(WORK_QUEUE_DISPATCHER)
            .kind(DispatcherKind::WorkerPool)
            .workers(config.workers)
            .wait_strategy(config.wait_strategy)
            .build();
        let sync = DispatcherConfig::builder()
            .name(SYNC_DISPATCHER)
            .kind(DispatcherKind::Synchronous)
            .build();

        let mut started: Vec<Arc<dyn Dispatcher>> = Vec::new();
        let result = Self::start_all(&config, [sync, shared, work_queue], &mut started);
        let (dispatchers, cached, timer) = match result {
            Ok(parts) => parts,
            Err(err) => {
                for dispatcher in &started {
                    dispatcher.shutdown();
                }
                return Err(err);
            }
        };

        tracing::info!(
            dispatchers = dispatchers.len(),
            cached = cached.len(),
            "environment started"
        );
        Ok(Self {
            inner: Arc::new(EnvironmentInner {
                dispatchers: RwLock::new(dispatchers),
                cached,
                pools: Mutex::new(Vec::new()),
                timer,
                alive: AtomicBool::new(true),
            }),
        })
    }

    /// Starts an environment with default configuration.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_defaults() -> Result<Self, EnvironmentError> {
        Self::new(EnvironmentConfig::default())
    }

    #[allow(clippy::type_complexity)]
    fn start_all(
        config: &EnvironmentConfig,
        builtin: [DispatcherConfig; 3],
        started: &mut Vec<Arc<dyn Dispatcher>>,
    ) -> Result<(FxHashMap<String, Arc<dyn Dispatcher>>, DispatcherSupplier, Timer), EnvironmentError>
    {
        let mut dispatchers = FxHashMap::default();
        for dispatcher_config in builtin.iter().chain(config.dispatchers.iter()) {
            if dispatchers.contains_key(&dispatcher_config.name) {
                return Err(EnvironmentError::DuplicateDispatcher(
                    dispatcher_config.name.clone(),
                ));
            }
            let dispatcher = dispatch::from_config(dispatcher_config)?;
            started.push(Arc::clone(&dispatcher));
            dispatchers.insert(dispatcher_config.name.clone(), dispatcher);
        }

        let cached = Self::start_pool(
            "cached",
            config.cached_pool_size,
            config.ring_capacity,
            config.wait_strategy,
            started,
        )?;
        let timer = Timer::new("environment")?;
        Ok((dispatchers, cached, timer))
    }

    fn start_pool(
        name: &str,
        size: usize,
        capacity: usize,
        wait_strategy: WaitStrategy,
        started: &mut Vec<Arc<dyn Dispatcher>>,
    ) -> Result<DispatcherSupplier, EnvironmentError> {
        if size == 0 {
            return Err(EnvironmentError::InvalidConfig(format!(
                "pool '{name}' needs at least one dispatcher"
            )));
        }
        let mut pool = Vec::with_capacity(size);
        for index in 0..size {
            let config = DispatcherConfig::builder()
                .name(format!("{name}-{index}"))
                .kind(DispatcherKind::RingBuffer)
                .capacity(capacity)
                .wait_strategy(wait_strategy)
                .build();
            let dispatcher = dispatch::from_config(&config)?;
            started.push(Arc::clone(&dispatcher));
            pool.push(dispatcher);
        }
        DispatcherSupplier::new(name, pool).map_err(EnvironmentError::from)
    }

    fn ensure_alive(&self) -> Result<(), EnvironmentError> {
        if self.inner.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EnvironmentError::ShutDown)
        }
    }

    /// Looks up a dispatcher by name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::UnknownDispatcher`] if nothing is
    /// registered under `name`.
    pub fn get_dispatcher(&self, name: &str) -> Result<Arc<dyn Dispatcher>, EnvironmentError> {
        self.inner
            .dispatchers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EnvironmentError::UnknownDispatcher(name.to_string()))
    }

    /// The shared ring-buffer dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::UnknownDispatcher`] if it was removed by
    /// a conflicting registration, which [`new`](Self::new) prevents.
    pub fn shared_dispatcher(&self) -> Result<Arc<dyn Dispatcher>, EnvironmentError> {
        self.get_dispatcher(SHARED_DISPATCHER)
    }

    /// Registers an externally created dispatcher. The environment shuts it
    /// down with the rest.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::DuplicateDispatcher`] if `name` is taken
    /// and [`EnvironmentError::ShutDown`] after shutdown.
    pub fn register_dispatcher(
        &self,
        name: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<(), EnvironmentError> {
        self.ensure_alive()?;
        let name = name.into();
        let mut dispatchers = self.inner.dispatchers.write();
        if dispatchers.contains_key(&name) {
            return Err(EnvironmentError::DuplicateDispatcher(name));
        }
        tracing::debug!(dispatcher = %name, kind = dispatcher.kind().as_str(), "dispatcher registered");
        dispatchers.insert(name, dispatcher);
        Ok(())
    }

    /// Creates a pool of `size` ring-buffer dispatchers handed out
    /// round-robin. The environment keeps the pool until
    /// [`release_dispatcher_pool`](Self::release_dispatcher_pool) or
    /// [`shutdown`](Self::shutdown), whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::InvalidConfig`] for a zero size,
    /// [`EnvironmentError::ShutDown`] after shutdown, and thread spawn
    /// failures.
    pub fn create_dispatcher_pool(
        &self,
        name: &str,
        size: usize,
        capacity: usize,
        wait_strategy: WaitStrategy,
    ) -> Result<DispatcherSupplier, EnvironmentError> {
        self.ensure_alive()?;
        let mut started = Vec::new();
        match Self::start_pool(name, size, capacity, wait_strategy, &mut started) {
            Ok(pool) => {
                self.inner.pools.lock().push(pool.clone());
                Ok(pool)
            }
            Err(err) => {
                for dispatcher in &started {
                    dispatcher.shutdown();
                }
                Err(err)
            }
        }
    }

    /// Shuts a pool from [`create_dispatcher_pool`](Self::create_dispatcher_pool)
    /// down and stops tracking it. Returns false if the environment does not
    /// own `pool`, including after shutdown.
    pub fn release_dispatcher_pool(&self, pool: &DispatcherSupplier) -> bool {
        let released = {
            let mut pools = self.inner.pools.lock();
            pools
                .iter()
                .position(|owned| owned.same_pool(pool))
                .map(|index| pools.swap_remove(index))
        };
        match released {
            Some(owned) => {
                owned.shutdown();
                tracing::debug!(pool = owned.name(), "dispatcher pool released");
                true
            }
            None => false,
        }
    }

    /// Number of pools created through
    /// [`create_dispatcher_pool`](Self::create_dispatcher_pool) and not yet
    /// released.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner.pools.lock().len()
    }

    /// The next dispatcher of the cached pool.
    #[must_use]
    pub fn cached_dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.inner.cached.next()
    }

    /// The cached pool.
    #[must_use]
    pub fn cached_dispatchers(&self) -> &DispatcherSupplier {
        &self.inner.cached
    }

    /// The shared timer.
    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.inner.timer
    }

    /// Names of all registered dispatchers, sorted.
    #[must_use]
    pub fn dispatcher_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.dispatchers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns true until [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Shuts down every dispatcher, pool and the timer. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let dispatchers: Vec<_> = self.inner.dispatchers.read().values().cloned().collect();
        for dispatcher in dispatchers {
            dispatcher.shutdown();
        }
        self.inner.cached.shutdown();
        let pools = std::mem::take(&mut *self.inner.pools.lock());
        for pool in pools {
            pool.shutdown();
        }
        self.inner.timer.shutdown();
        tracing::info!("environment shut down");
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("dispatchers", &self.dispatcher_names())
            .field("cached", &self.inner.cached.len())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Streams;
    use std::sync::mpsc;
    use std::time::Duration;

    fn small() -> Environment {
        Environment::new(
            EnvironmentConfig::builder()
                .workers(2)
                .cached_pool_size(2)
                .ring_capacity(64)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_dispatchers() {
        let env = small();
        assert_eq!(
            env.get_dispatcher("sync").unwrap().kind(),
            DispatcherKind::Synchronous
        );
        assert_eq!(
            env.get_dispatcher("shared").unwrap().kind(),
            DispatcherKind::RingBuffer
        );
        assert_eq!(
            env.get_dispatcher("workQueue").unwrap().kind(),
            DispatcherKind::WorkerPool
        );
        assert!(matches!(
            env.get_dispatcher("missing"),
            Err(EnvironmentError::UnknownDispatcher(_))
        ));
        env.shutdown();
    }

    #[test]
    fn test_cached_dispatcher_round_robin() {
        let env = small();
        let a = env.cached_dispatcher();
        let b = env.cached_dispatcher();
        let c = env.cached_dispatcher();
        assert_ne!(a.name(), b.name());
        assert_eq!(a.name(), c.name());
        env.shutdown();
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let env = small();
        let extra = dispatch::from_config(
            &DispatcherConfig::builder()
                .name("extra")
                .kind(DispatcherKind::Synchronous)
                .build(),
        )
        .unwrap();
        env.register_dispatcher("extra", Arc::clone(&extra)).unwrap();
        assert!(matches!(
            env.register_dispatcher("extra", extra),
            Err(EnvironmentError::DuplicateDispatcher(_))
        ));
        assert!(env.dispatcher_names().contains(&"extra".to_string()));
        env.shutdown();
    }

    #[test]
    fn test_configured_dispatcher_clashing_with_builtin() {
        let config = EnvironmentConfig::builder()
            .workers(1)
            .cached_pool_size(1)
            .dispatcher(DispatcherConfig::builder().name("shared").build())
            .build();
        assert!(matches!(
            Environment::new(config),
            Err(EnvironmentError::DuplicateDispatcher(name)) if name == "shared"
        ));
    }

    #[test]
    fn test_create_dispatcher_pool() {
        let env = small();
        assert!(matches!(
            env.create_dispatcher_pool("p", 0, 64, WaitStrategy::Park),
            Err(EnvironmentError::InvalidConfig(_))
        ));
        let pool = env
            .create_dispatcher_pool("p", 3, 64, WaitStrategy::Park)
            .unwrap();
        assert_eq!(pool.len(), 3);
        env.shutdown();
        assert!(pool.dispatchers().iter().all(|d| !d.is_alive()));
    }

    #[test]
    fn test_release_dispatcher_pool() {
        let env = small();
        let kept = env
            .create_dispatcher_pool("kept", 1, 64, WaitStrategy::Park)
            .unwrap();
        let released = env
            .create_dispatcher_pool("released", 2, 64, WaitStrategy::Park)
            .unwrap();
        assert_eq!(env.pool_count(), 2);

        assert!(env.release_dispatcher_pool(&released.clone()));
        assert!(released.dispatchers().iter().all(|d| !d.is_alive()));
        assert!(kept.dispatchers().iter().all(|d| d.is_alive()));
        assert_eq!(env.pool_count(), 1);
        assert!(!env.release_dispatcher_pool(&released));
        assert!(!env.release_dispatcher_pool(env.cached_dispatchers()));

        env.shutdown();
        assert_eq!(env.pool_count(), 0);
        assert!(!env.release_dispatcher_pool(&kept));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let env = small();
        let shared = env.shared_dispatcher().unwrap();
        env.shutdown();
        env.shutdown();
        assert!(!env.is_alive());
        assert!(!shared.is_alive());
        assert!(!env.timer().is_running());
        assert!(matches!(
            env.create_dispatcher_pool("late", 1, 64, WaitStrategy::Park),
            Err(EnvironmentError::ShutDown)
        ));
    }

    #[test]
    fn test_pipeline_on_environment_dispatchers() {
        let env = small();
        let (tx, rx) = mpsc::channel();
        let _control = Streams::range(0, 100)
            .dispatch_on(env.cached_dispatcher())
            .buffer_timeout(10, Duration::from_secs(5), env.timer())
            .map(|batch: Vec<i64>| Ok(batch.iter().sum::<i64>()))
            .consume(move |sum| tx.send(sum).unwrap());
        let total: i64 = rx.iter().take(10).sum();
        assert_eq!(total, (0..100).sum::<i64>());
        env.shutdown();
    }
}
