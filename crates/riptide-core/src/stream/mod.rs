//! # Streams
//!
//! Declarative pipelines over the subscription protocol.
//!
//! A [`Stream`] is an immutable description of a chain of stages. Nothing
//! runs until a consumer subscribes: at that point every stage is
//! materialized into an action, wired to its upstream and downstream, and
//! demand starts flowing from the consumer towards the source.
//!
//! ```text
//!  Streams::just(..) ─▶ map ─▶ filter ─▶ buffer ─▶ consume(f)
//!        ▲               ▲        ▲         ▲          │
//!        └── request ────┴────────┴─────────┴──────────┘
//! ```
//!
//! Decorations (`when`, `ignore_error`, `finally_do`, `named`) apply to the
//! stage they are called on and never leak into other chains built from the
//! same `Stream` value.

mod action;
mod batch;
mod combine;
mod control;
mod flat_map;
mod ops;
mod options;
mod partition;
mod processor;
mod request_when;
mod source;
mod timed;

pub use combine::Processor;
pub use control::Control;
pub use source::Streams;

pub(crate) use processor::UnicastProcessor;

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use self::action::{Action, Identity, Operator};
use self::options::StageOptions;
use crate::dispatch::Dispatcher;
use crate::error::{ErrorMatcher, StreamError};
use crate::promise::Promise;
use crate::reactive::{Publisher, SignalKind, Subscriber};
use crate::timer::Timer;

/// Default number of elements requested from each inner stream of
/// [`Stream::flat_map`].
pub const DEFAULT_PREFETCH: u64 = 32;

/// Default number of inner streams [`Stream::flat_map`] keeps subscribed at
/// once.
pub const DEFAULT_CONCURRENCY: u64 = 32;

/// Builds one stage of a pipeline when a consumer subscribes.
pub(crate) trait Stage<T>: Send + Sync {
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<T>>);
}

/// Wraps `downstream` in an identity action when a source carries
/// decorations.
pub(crate) fn decorate<T: Send + 'static>(
    kind: &'static str,
    options: &StageOptions,
    downstream: Box<dyn Subscriber<T>>,
) -> Box<dyn Subscriber<T>> {
    if options.is_plain() && options.name().is_none() {
        downstream
    } else {
        Action::spawn(Box::new(Identity::new(kind)), options.clone(), None, downstream)
    }
}

type OperatorFactory<I, O> = Arc<dyn Fn() -> Box<dyn Operator<I, O>> + Send + Sync>;

struct OperatorStage<I, O> {
    upstream: Stream<I>,
    factory: OperatorFactory<I, O>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl<I: Send + 'static, O: Send + 'static> Stage<O> for OperatorStage<I, O> {
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<O>>) {
        let inlet = Action::spawn(
            (self.factory)(),
            options.clone(),
            self.dispatcher.clone(),
            downstream,
        );
        self.upstream.subscribe(inlet);
    }
}

struct PublisherStage<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T: Send + 'static> Stage<T> for PublisherStage<T> {
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<T>>) {
        self.publisher
            .subscribe(decorate("publisher", options, downstream));
    }
}

/// A lazily materialized pipeline producing `T`.
///
/// Cloning is cheap and yields an independent description: subscribing
/// twice materializes two pipelines.
pub struct Stream<T> {
    stage: Arc<dyn Stage<T>>,
    options: StageOptions,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            stage: Arc::clone(&self.stage),
            options: self.options.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Stream<T> {
    pub(crate) fn from_stage(stage: Arc<dyn Stage<T>>) -> Self {
        Self {
            stage,
            options: StageOptions::default(),
        }
    }

    /// Adapts any publisher into a stream.
    pub fn from_publisher(publisher: Arc<dyn Publisher<T>>) -> Self {
        Self::from_stage(Arc::new(PublisherStage { publisher }))
    }

    /// Materializes the pipeline in front of `subscriber`.
    pub fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.stage.materialize(&self.options, subscriber);
    }

    fn decorated(&self, options: StageOptions) -> Self {
        Self {
            stage: Arc::clone(&self.stage),
            options,
        }
    }

    fn lift<R, Op, M>(&self, dispatcher: Option<Arc<dyn Dispatcher>>, make: M) -> Stream<R>
    where
        R: Send + 'static,
        Op: Operator<T, R>,
        M: Fn() -> Op + Send + Sync + 'static,
    {
        let factory: OperatorFactory<T, R> = Arc::new(move || Box::new(make()));
        Stream::from_stage(Arc::new(OperatorStage {
            upstream: self.clone(),
            factory,
            dispatcher,
        }))
    }

    // ------------------------------------------------------------------
    // Transformations
    // ------------------------------------------------------------------

    /// Transforms every element. A failing closure fails the stage.
    #[must_use]
    pub fn map<R, F>(&self, f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> Result<R, StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || ops::Map::new(f.clone()))
    }

    /// Keeps elements matching `predicate`.
    #[must_use]
    pub fn filter<P>(&self, predicate: P) -> Stream<T>
    where
        P: FnMut(&T) -> Result<bool, StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || ops::Filter::new(predicate.clone()))
    }

    /// Runs a side effect for every element and forwards it unchanged.
    #[must_use]
    pub fn observe<F>(&self, f: F) -> Stream<T>
    where
        F: FnMut(&T) -> Result<(), StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || ops::Observe::new(f.clone()))
    }

    /// Runs `f` when the stage is materialized, before any demand flows.
    #[must_use]
    pub fn observe_subscribe<F>(&self, f: F) -> Stream<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn() + Send + Sync> = Arc::new(f);
        self.lift(None, move || ops::ObserveSubscribe::new(Arc::clone(&f)))
    }

    /// Emits the running accumulator for every element.
    #[must_use]
    pub fn scan<A, F>(&self, seed: A, f: F) -> Stream<A>
    where
        A: Clone + Send + Sync + 'static,
        F: FnMut(A, T) -> Result<A, StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || ops::Scan::new(seed.clone(), f.clone()))
    }

    /// Folds every element and emits the result once on completion.
    #[must_use]
    pub fn reduce<A, F>(&self, seed: A, f: F) -> Stream<A>
    where
        A: Clone + Send + Sync + 'static,
        F: FnMut(A, T) -> Result<A, StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || ops::Reduce::new(seed.clone(), f.clone()))
    }

    /// Emits the number of elements once on completion.
    #[must_use]
    pub fn count(&self) -> Stream<u64> {
        self.lift(None, ops::Count::default)
    }

    /// Emits the first element, then completes and cancels upstream.
    #[must_use]
    pub fn first(&self) -> Stream<T> {
        self.lift(None, ops::First::default)
    }

    /// Emits the last element once on completion.
    #[must_use]
    pub fn last(&self) -> Stream<T> {
        self.lift(None, ops::Last::default)
    }

    /// Emits a `tracing` event for every signal crossing this point.
    #[must_use]
    pub fn log(&self, name: &str) -> Stream<T> {
        let name: Arc<str> = Arc::from(name);
        self.lift(None, move || ops::Log::new(Arc::clone(&name)))
    }

    /// Never keeps more than `n` elements requested from upstream.
    #[must_use]
    pub fn capacity(&self, n: u64) -> Stream<T> {
        self.lift(None, move || Identity::capped(n))
    }

    // ------------------------------------------------------------------
    // Batching and fan-out
    // ------------------------------------------------------------------

    /// Groups elements into batches of `count`; the last batch may be
    /// shorter.
    #[must_use]
    pub fn buffer(&self, count: usize) -> Stream<Vec<T>> {
        if count == 0 {
            return Streams::fail(StreamError::illegal_argument("buffer size must be positive"));
        }
        self.lift(None, move || batch::Buffer::new(count))
    }

    /// Groups elements into batches of `count`, flushing a partial batch
    /// `timeout` after its first element.
    #[must_use]
    pub fn buffer_timeout(&self, count: usize, timeout: Duration, timer: &Timer) -> Stream<Vec<T>> {
        if count == 0 {
            return Streams::fail(StreamError::illegal_argument("buffer size must be positive"));
        }
        let timer = timer.clone();
        self.lift(None, move || {
            batch::BufferTimeout::new(count, timeout, timer.clone())
        })
    }

    /// Splits the stream into consecutive sub-streams of `count` elements.
    #[must_use]
    pub fn window(&self, count: usize) -> Stream<Stream<T>> {
        if count == 0 {
            return Streams::fail(StreamError::illegal_argument("window size must be positive"));
        }
        self.lift(None, move || batch::Window::new(count))
    }

    /// Distributes elements round-robin over exactly `n` sub-streams.
    #[must_use]
    pub fn partition(&self, n: usize) -> Stream<Stream<T>> {
        if n == 0 {
            return Streams::fail(StreamError::illegal_argument("partition count must be positive"));
        }
        self.lift(None, move || partition::Partition::round_robin(n))
    }

    /// Distributes elements over exactly `n` sub-streams by key hash.
    #[must_use]
    pub fn partition_by<K, F>(&self, n: usize, key: F) -> Stream<Stream<T>>
    where
        K: Hash,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        if n == 0 {
            return Streams::fail(StreamError::illegal_argument("partition count must be positive"));
        }
        let key = Arc::new(key);
        self.lift(None, move || {
            let key = Arc::clone(&key);
            partition::Partition::keyed(n, move |value: &T| fxhash::hash64(&(*key)(value)))
        })
    }

    /// Maps every element to a stream and merges the results.
    #[must_use]
    pub fn flat_map<R, F>(&self, f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> Result<Stream<R>, StreamError> + Clone + Send + Sync + 'static,
    {
        self.flat_map_with_prefetch(DEFAULT_PREFETCH, f)
    }

    /// [`flat_map`](Self::flat_map) with an explicit per-inner prefetch.
    #[must_use]
    pub fn flat_map_with_prefetch<R, F>(&self, prefetch: u64, f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> Result<Stream<R>, StreamError> + Clone + Send + Sync + 'static,
    {
        self.flat_map_bounded(DEFAULT_CONCURRENCY, prefetch, f)
    }

    /// [`flat_map`](Self::flat_map) that keeps at most `max_concurrency`
    /// inner streams subscribed and requests up to `prefetch` elements from
    /// each. Both are raised to 1 if zero.
    #[must_use]
    pub fn flat_map_bounded<R, F>(&self, max_concurrency: u64, prefetch: u64, f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> Result<Stream<R>, StreamError> + Clone + Send + Sync + 'static,
    {
        self.lift(None, move || {
            flat_map::FlatMap::new(max_concurrency, prefetch, f.clone())
        })
    }

    /// Interleaves this stream with `other`.
    #[must_use]
    pub fn merge_with(&self, other: &Stream<T>) -> Stream<T> {
        Streams::merge(vec![self.clone(), other.clone()])
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Emits at most one element, the latest, per `interval`.
    #[must_use]
    pub fn throttle(&self, interval: Duration, timer: &Timer) -> Stream<T> {
        let timer = timer.clone();
        self.lift(None, move || timed::Throttle::new(interval, timer.clone()))
    }

    /// Completes and cancels upstream once `duration` has elapsed.
    #[must_use]
    pub fn take(&self, duration: Duration, timer: &Timer) -> Stream<T> {
        let timer = timer.clone();
        self.lift(None, move || timed::Take::new(duration, timer.clone()))
    }

    // ------------------------------------------------------------------
    // Flow control and scheduling
    // ------------------------------------------------------------------

    /// Feeds downstream demand into `f`; the values of the returned stream
    /// are what gets requested upstream.
    #[must_use]
    pub fn request_when<F>(&self, f: F) -> Stream<T>
    where
        F: Fn(Stream<u64>) -> Stream<u64> + Send + Sync + 'static,
    {
        let f: request_when::DemandShaper = Arc::new(f);
        self.lift(None, move || request_when::RequestWhen::new(Arc::clone(&f)))
    }

    /// Delivers signals from this point on `dispatcher`.
    #[must_use]
    pub fn dispatch_on(&self, dispatcher: Arc<dyn Dispatcher>) -> Stream<T> {
        self.lift(Some(dispatcher), || Identity::new("dispatch_on"))
    }

    // ------------------------------------------------------------------
    // Decorations
    // ------------------------------------------------------------------

    /// Runs `handler` when this stage fails with an error selected by
    /// `matcher`. Handlers are tried in registration order; the first match
    /// runs.
    #[must_use]
    pub fn when<M, H>(&self, matcher: M, handler: H) -> Stream<T>
    where
        M: Into<ErrorMatcher>,
        H: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.decorated(self.options.with_handler(matcher.into(), Arc::new(handler)))
    }

    /// Swallows failures of this stage after handlers ran; the stage keeps
    /// consuming.
    #[must_use]
    pub fn ignore_error(&self) -> Stream<T> {
        self.decorated(self.options.with_ignore_errors())
    }

    /// Runs `hook` exactly once with the terminal signal of this stage.
    #[must_use]
    pub fn finally_do<F>(&self, hook: F) -> Stream<T>
    where
        F: Fn(SignalKind) + Send + Sync + 'static,
    {
        self.decorated(self.options.with_finally(Arc::new(hook)))
    }

    /// Names this stage in snapshots.
    #[must_use]
    pub fn named(&self, name: &str) -> Stream<T> {
        self.decorated(self.options.with_name(name))
    }

    // ------------------------------------------------------------------
    // Terminal
    // ------------------------------------------------------------------

    /// Resolves a promise with the first element.
    ///
    /// The promise is rejected with the stream's error, or with
    /// [`FailureKind::Empty`](crate::error::FailureKind::Empty) if the stream
    /// completes without an element.
    pub fn to_promise(&self) -> Promise<T>
    where
        T: Clone,
    {
        let promise = Promise::new();
        self.subscribe(Box::new(promise.subscriber()));
        promise
    }
}

impl<T: Send + 'static> Publisher<T> for Stream<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        Stream::subscribe(self, subscriber);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{collect, recorder};
    use super::*;
    use crate::error::FailureKind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_nothing_runs_before_subscribe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let stream = Streams::range(0, 5).map(move |v| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(v)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(collect(&stream).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_each_subscription_materializes_again() {
        let stream = Streams::just(vec![1, 2, 3]).map(|v| Ok(v * 10));
        assert_eq!(collect(&stream).unwrap(), vec![10, 20, 30]);
        assert_eq!(collect(&stream).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_demand_bounds_delivery() {
        let stream = Streams::range(0, 100).map(|v| Ok(v + 1));
        let (p, handle) = recorder(3);
        stream.subscribe(Box::new(p));
        assert_eq!(handle.values(), vec![1, 2, 3]);

        handle.request(2);
        assert_eq!(handle.values(), vec![1, 2, 3, 4, 5]);
        assert!(!handle.is_complete());

        handle.request(u64::MAX);
        assert_eq!(handle.values().len(), 100);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_request_zero_fails_the_stage() {
        let stream = Streams::range(0, 10).map(Ok);
        let (p, handle) = recorder(0);
        stream.subscribe(Box::new(p));
        handle.request(0);
        let err = handle.error().unwrap();
        assert_eq!(err.kind(), FailureKind::Protocol);
        assert!(handle.values().is_empty());
    }

    #[test]
    fn test_cancel_stops_delivery() {
        let finally = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&finally);
        let stream = Streams::range(0, 1_000)
            .map(Ok)
            .finally_do(move |signal| f.lock().push(signal));
        let (p, handle) = recorder(5);
        stream.subscribe(Box::new(p));
        handle.cancel();
        handle.cancel();
        handle.request(10);
        assert_eq!(handle.values().len(), 5);
        assert_eq!(*finally.lock(), vec![SignalKind::Cancel]);
    }

    #[test]
    fn test_decorations_do_not_leak_between_chains() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let base = Streams::just(vec!["1", "x"]).map(|s: &str| Ok(s.parse::<i32>()?));
        let handled = base.when(FailureKind::Parse, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(collect(&base).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(collect(&handled).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_named_stage_appears_in_snapshot() {
        let stream = Streams::range(0, 10).map(Ok).named("square");
        let (p, handle) = recorder::<i64>(2);
        stream.subscribe(Box::new(p));
        let subscription = handle.subscription.lock().clone().unwrap();
        let mut stages = Vec::new();
        subscription.describe(&mut stages);
        assert_eq!(stages[0].kind, "map");
        assert_eq!(stages[0].name.as_deref(), Some("square"));
    }
}
