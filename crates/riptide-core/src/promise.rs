//! Single-resolution future.
//!
//! A [`Promise<T>`] moves from pending to exactly one of fulfilled or
//! rejected. The first of [`complete`](Promise::complete) and
//! [`fail`](Promise::fail) wins; every later attempt is reported as
//! [`PromiseError::AlreadyCompleted`].
//!
//! Waiting is available three ways:
//!
//! | Accessor | Blocking | Notes |
//! |----------|----------|-------|
//! | [`get`](Promise::get) / [`get_timeout`](Promise::get_timeout) | thread | `parking_lot::Condvar` |
//! | [`wait`](Promise::wait) | async | `tokio::sync::Notify` |
//! | [`on_success`](Promise::on_success) / [`stream`](Promise::stream) | no | callbacks run on the resolving thread |

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{FailureKind, StreamError};
use crate::reactive::{Subscriber, Subscription};
use crate::stream::{Stream, Streams, UnicastProcessor};

/// Errors returned by [`Promise`] accessors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PromiseError {
    /// `complete` or `fail` was called on a resolved promise.
    #[error("promise already completed")]
    AlreadyCompleted,

    /// The promise was rejected.
    #[error("promise rejected: {0}")]
    Rejected(#[source] StreamError),

    /// The bounded wait elapsed before resolution.
    #[error("promise not resolved within {0:?}")]
    Timeout(Duration),
}

type SuccessFn<T> = Box<dyn FnOnce(T) + Send>;
type ErrorFn = Box<dyn FnOnce(StreamError) + Send>;

enum State<T> {
    Pending {
        on_success: Vec<SuccessFn<T>>,
        on_error: Vec<ErrorFn>,
    },
    Fulfilled(T),
    Rejected(StreamError),
}

impl<T: Clone> State<T> {
    fn outcome(&self) -> Option<Result<T, StreamError>> {
        match self {
            Self::Pending { .. } => None,
            Self::Fulfilled(value) => Some(Ok(value.clone())),
            Self::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
    notify: Notify,
}

/// Single-resolution future shared by clones.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(State::Pending {
            on_success: Vec::new(),
            on_error: Vec::new(),
        })
    }

    /// Creates an already fulfilled promise.
    #[must_use]
    pub fn success(value: T) -> Self {
        Self::with_state(State::Fulfilled(value))
    }

    /// Creates an already rejected promise.
    #[must_use]
    pub fn failed(error: StreamError) -> Self {
        Self::with_state(State::Rejected(error))
    }

    fn with_state(state: State<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                resolved: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Fulfills the promise.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyCompleted`] if the promise was already
    /// resolved.
    pub fn complete(&self, value: T) -> Result<(), PromiseError> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            let State::Pending { on_success, .. } = &mut *state else {
                return Err(PromiseError::AlreadyCompleted);
            };
            let callbacks = std::mem::take(on_success);
            *state = State::Fulfilled(value.clone());
            callbacks
        };
        self.wake();
        for callback in callbacks {
            callback(value.clone());
        }
        Ok(())
    }

    /// Rejects the promise.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyCompleted`] if the promise was already
    /// resolved.
    pub fn fail(&self, error: StreamError) -> Result<(), PromiseError> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            let State::Pending { on_error, .. } = &mut *state else {
                return Err(PromiseError::AlreadyCompleted);
            };
            let callbacks = std::mem::take(on_error);
            *state = State::Rejected(error.clone());
            callbacks
        };
        self.wake();
        for callback in callbacks {
            callback(error.clone());
        }
        Ok(())
    }

    fn wake(&self) {
        self.inner.resolved.notify_all();
        self.inner.notify.notify_waiters();
    }

    /// Returns true once fulfilled or rejected.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.inner.state.lock(), State::Pending { .. })
    }

    /// Returns true if fulfilled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Fulfilled(_))
    }

    /// The rejection cause, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<StreamError> {
        match &*self.inner.state.lock() {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// The value without waiting, if fulfilled.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        match &*self.inner.state.lock() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Blocks until resolved.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::Rejected`] with the stored error.
    pub fn get(&self) -> Result<T, PromiseError> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome.map_err(PromiseError::Rejected);
            }
            self.inner.resolved.wait(&mut state);
        }
    }

    /// Blocks until resolved or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::Rejected`] with the stored error, or
    /// [`PromiseError::Timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PromiseError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome.map_err(PromiseError::Rejected);
            }
            if self.inner.resolved.wait_until(&mut state, deadline).timed_out() {
                return match state.outcome() {
                    Some(outcome) => outcome.map_err(PromiseError::Rejected),
                    None => Err(PromiseError::Timeout(timeout)),
                };
            }
        }
    }

    /// Waits asynchronously until resolved.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::Rejected`] with the stored error.
    pub async fn wait(&self) -> Result<T, PromiseError> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.inner.state.lock().outcome() {
                return outcome.map_err(PromiseError::Rejected);
            }
            notified.await;
        }
    }

    /// Runs `f` with the value once fulfilled. Runs immediately if already
    /// fulfilled; never runs if rejected.
    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let value = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending { on_success, .. } => {
                    on_success.push(Box::new(f));
                    return self;
                }
                State::Fulfilled(value) => value.clone(),
                State::Rejected(_) => return self,
            }
        };
        f(value);
        self
    }

    /// Runs `f` with the error once rejected. Runs immediately if already
    /// rejected; never runs if fulfilled.
    pub fn on_error<F>(&self, f: F) -> &Self
    where
        F: FnOnce(StreamError) + Send + 'static,
    {
        let error = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending { on_error, .. } => {
                    on_error.push(Box::new(f));
                    return self;
                }
                State::Rejected(error) => error.clone(),
                State::Fulfilled(_) => return self,
            }
        };
        f(error);
        self
    }

    /// A stream of the resolved value: one element then completion, or the
    /// rejection.
    #[must_use]
    pub fn stream(&self) -> Stream<T> {
        let promise = self.clone();
        Streams::defer(move || {
            let processor = UnicastProcessor::new("promise");
            let on_value = Arc::clone(&processor);
            let on_failure = Arc::clone(&processor);
            promise
                .on_success(move |value| {
                    on_value.push(value);
                    on_value.complete();
                })
                .on_error(move |error| on_failure.fail(error));
            Stream::from_processor(&processor)
        })
    }

    /// A subscriber resolving this promise with the first element it
    /// receives, then cancelling its subscription.
    pub(crate) fn subscriber(&self) -> PromiseSubscriber<T> {
        PromiseSubscriber {
            promise: self.clone(),
            subscription: None,
            done: false,
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending { .. } => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

pub(crate) struct PromiseSubscriber<T> {
    promise: Promise<T>,
    subscription: Option<Arc<dyn Subscription>>,
    done: bool,
}

impl<T: Clone + Send + 'static> PromiseSubscriber<T> {
    fn settle(&mut self, outcome: Result<T, StreamError>) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        let result = match outcome {
            Ok(value) => self.promise.complete(value),
            Err(error) => self.promise.fail(error),
        };
        if let Err(error) = result {
            tracing::warn!(%error, "stream resolved a promise that was already completed");
        }
    }
}

impl<T: Clone + Send + 'static> Subscriber<T> for PromiseSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.done {
            subscription.cancel();
            return;
        }
        self.subscription = Some(Arc::clone(&subscription));
        subscription.request(1);
    }

    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        self.settle(Ok(value));
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.subscription = None;
        self.settle(Err(error));
    }

    fn on_complete(&mut self) {
        self.subscription = None;
        self.settle(Err(StreamError::new(
            FailureKind::Empty,
            "stream completed without an element",
        )));
    }
}
