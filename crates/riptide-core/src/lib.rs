//! # Riptide Core
//!
//! Reactive dataflow engine: chains of backpressured transformation stages
//! over push-based sources, executed on pluggable dispatchers.
//!
//! This crate provides:
//! - **Protocol**: the publisher/subscriber/subscription demand contract
//! - **Dispatchers**: synchronous, ring-buffer and worker-pool execution
//! - **Streams**: lazily materialized operator chains (map, filter, buffer,
//!   window, partition, merge, flat_map, throttle, ...)
//! - **Promise**, **Broadcaster** and **BarrierStream** collaborators
//! - **Environment**: named dispatchers plus a shared timer
//!
//! ## Design Principles
//!
//! 1. **Bounded delivery** - a stage never receives more than it requested
//! 2. **Serialized stages** - one drain loop per stage, whatever the thread
//! 3. **Lazy wiring** - nothing runs until a stream is subscribed
//! 4. **Explicit lifecycle** - environments and dispatchers are shut down by
//!    their owner
//!
//! ## Example
//!
//! ```rust,ignore
//! use riptide_core::stream::Streams;
//!
//! let total = Streams::just(vec!["1", "2", "3", "4", "5"])
//!     .map(|s: &str| Ok(s.parse::<i32>()?))
//!     .reduce(1, |acc, v| Ok(acc * v))
//!     .to_promise()
//!     .get()?;
//! assert_eq!(total, 120);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod barrier;
pub mod broadcaster;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod promise;
pub mod reactive;
pub mod snapshot;
pub mod stream;
pub mod timer;

// Re-export key types
pub use barrier::BarrierStream;
pub use broadcaster::Broadcaster;
pub use dispatch::{Dispatcher, DispatcherConfig, DispatcherKind, DispatcherSupplier};
pub use environment::{Environment, EnvironmentConfig};
pub use error::{ErrorMatcher, FailureKind, StreamError};
pub use promise::Promise;
pub use reactive::{Publisher, Subscriber, Subscription, UNBOUNDED};
pub use snapshot::{PipelineSnapshot, StageSnapshot};
pub use stream::{Control, Processor, Stream, Streams};
pub use timer::Timer;

/// Result type for riptide-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for riptide-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure signalled through a pipeline
    #[error("Stream error: {0}")]
    Stream(#[from] error::StreamError),

    /// Subscription protocol breach
    #[error("Protocol error: {0}")]
    Protocol(#[from] error::ProtocolViolation),

    /// Dispatcher errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] dispatch::DispatchError),

    /// Timer errors
    #[error("Timer error: {0}")]
    Timer(#[from] timer::TimerError),

    /// Promise errors
    #[error("Promise error: {0}")]
    Promise(#[from] promise::PromiseError),

    /// Environment errors
    #[error("Environment error: {0}")]
    Environment(#[from] environment::EnvironmentError),
}
