//! # Subscription Protocol
//!
//! The demand/signal contract between two adjacent stages.
//!
//! ```text
//!   Publisher ──subscribe──▶ Subscriber
//!       ▲                        │
//!       │  request(n) / cancel   │ on_subscribe(Subscription)
//!       └──── Subscription ◀─────┘
//!
//!   on_next*  (on_error | on_complete)?
//! ```
//!
//! ## Rules
//!
//! - A publisher never delivers more `on_next` signals than the cumulative
//!   demand granted through [`Subscription::request`].
//! - Demand saturates at [`UNBOUNDED`]; once reached it is never decremented.
//! - After `on_error` or `on_complete` no further signal is delivered.
//! - `cancel` is idempotent and `request` after `cancel` is a no-op.
//! - `request(0)` is a protocol violation and terminates the stage with
//!   [`ProtocolViolation::NonPositiveRequest`](crate::error::ProtocolViolation).

mod demand;

pub use demand::{Demand, UNBOUNDED};
pub(crate) use demand::{add_demand, sub_demand};

use std::sync::Arc;

use serde::Serialize;

use crate::error::StreamError;
use crate::snapshot::StageSnapshot;

/// The kind of signal observed by hooks and protocol checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalKind {
    /// An element was delivered.
    Next,
    /// The stream failed.
    Error,
    /// The stream completed normally.
    Complete,
    /// The consumer cancelled.
    Cancel,
}

/// Producer-facing handle of one (upstream, downstream) edge.
pub trait Subscription: Send + Sync {
    /// Grants `n` more elements of demand.
    fn request(&self, n: u64);

    /// Stops delivery and releases upstream resources.
    fn cancel(&self);

    /// Appends a snapshot of this stage, and of every stage above it, to `out`.
    fn describe(&self, out: &mut Vec<StageSnapshot>) {
        let _ = out;
    }
}

/// Consumer side of the protocol.
pub trait Subscriber<T>: Send {
    /// Delivered exactly once, before any other signal.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// Delivers one element.
    fn on_next(&mut self, value: T);

    /// Terminal failure.
    fn on_error(&mut self, error: StreamError);

    /// Terminal success.
    fn on_complete(&mut self);
}

/// Anything a subscriber can be attached to.
pub trait Publisher<T>: Send + Sync {
    /// Attaches a subscriber. The subscriber receives `on_subscribe` before
    /// any other signal.
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

/// A subscription that ignores every request.
///
/// Handed to subscribers that are terminated before anything can be
/// delivered to them.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

impl EmptySubscription {
    /// Returns a shared instance.
    #[must_use]
    pub fn shared() -> Arc<dyn Subscription> {
        Arc::new(Self)
    }
}

/// Terminates `subscriber` with `error` without delivering any element.
pub fn reject<T>(subscriber: &mut dyn Subscriber<T>, error: StreamError) {
    subscriber.on_subscribe(EmptySubscription::shared());
    subscriber.on_error(error);
}
