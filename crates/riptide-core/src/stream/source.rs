//! Cold finite sources.

use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::options::StageOptions;
use super::{decorate, Stage, Stream, DEFAULT_PREFETCH};
use crate::error::{ProtocolViolation, StreamError};
use crate::reactive::{reject, Demand, Subscriber, Subscription};
use crate::snapshot::StageSnapshot;

/// Elements emitted per drain pass before demand is re-read.
const EMIT_BATCH: u64 = 64;

/// Constructors for source streams.
#[derive(Debug)]
pub struct Streams;

impl Streams {
    /// Emits `values` in order, then completes.
    #[must_use]
    pub fn just<T>(values: Vec<T>) -> Stream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::from_iter(values)
    }

    /// Emits every item of `iter`. Each subscription iterates a fresh clone.
    #[must_use]
    pub fn from_iter<I>(iter: I) -> Stream<I::Item>
    where
        I: IntoIterator + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
        I::Item: Send + 'static,
    {
        Stream::from_stage(Arc::new(IterStage { iter }))
    }

    /// Emits the integers in `start..end`.
    #[must_use]
    pub fn range(start: i64, end: i64) -> Stream<i64> {
        Self::from_iter(start..end)
    }

    /// Completes without emitting.
    #[must_use]
    pub fn empty<T: Send + 'static>() -> Stream<T> {
        Self::from_iter(std::iter::empty())
    }

    /// Fails every subscriber with `error`.
    #[must_use]
    pub fn fail<T: Send + 'static>(error: StreamError) -> Stream<T> {
        Stream::from_stage(Arc::new(FailStage { error }))
    }

    /// Builds a new stream for every subscriber.
    #[must_use]
    pub fn defer<T, F>(factory: F) -> Stream<T>
    where
        T: Send + 'static,
        F: Fn() -> Stream<T> + Send + Sync + 'static,
    {
        Stream::from_stage(Arc::new(DeferStage { factory }))
    }

    /// Interleaves `sources`. Completes when every source completed; the
    /// first failure cancels the others.
    #[must_use]
    pub fn merge<T: Send + 'static>(sources: Vec<Stream<T>>) -> Stream<T> {
        let concurrency = sources.len().max(1) as u64;
        Self::from_iter(sources).flat_map_bounded(concurrency, DEFAULT_PREFETCH, Ok)
    }
}

struct IterStage<I> {
    iter: I,
}

impl<I> Stage<I::Item> for IterStage<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<I::Item>>) {
        let mut downstream = decorate("iter", options, downstream);
        let subscription = Arc::new(IterSubscription {
            demand: Demand::new(),
            // Held until the subscriber is stored.
            wip: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
            violated: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            state: Mutex::new(IterState {
                iter: self.iter.clone().into_iter().peekable(),
                subscriber: None,
            }),
        });

        downstream.on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
        subscription.state.lock().subscriber = Some(downstream);
        subscription.drain();
    }
}

struct IterState<It: Iterator> {
    iter: Peekable<It>,
    subscriber: Option<Box<dyn Subscriber<It::Item>>>,
}

/// Subscription emitting from an iterator.
///
/// The state mutex is only taken by the thread owning `wip`, so reentrant
/// `request` and `cancel` calls from `on_next` never block.
struct IterSubscription<It: Iterator> {
    demand: Demand,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    violated: AtomicBool,
    finished: AtomicBool,
    state: Mutex<IterState<It>>,
}

impl<It> IterSubscription<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    /// Drain loop; the caller owns one `wip` unit.
    fn drain(&self) {
        let mut missed = 1;
        loop {
            self.emit();
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }

    fn emit(&self) {
        let mut st = self.state.lock();
        let Some(mut subscriber) = st.subscriber.take() else {
            return;
        };

        loop {
            if self.violated.load(Ordering::Acquire) {
                let violation = ProtocolViolation::NonPositiveRequest {
                    stage: "iter".to_string(),
                };
                self.finished.store(true, Ordering::Release);
                subscriber.on_error(violation.into());
                return;
            }
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if st.iter.peek().is_none() {
                self.finished.store(true, Ordering::Release);
                subscriber.on_complete();
                return;
            }

            let mut sent = 0u64;
            while sent < EMIT_BATCH
                && st.iter.peek().is_some()
                && self.demand.try_consume(1)
            {
                if let Some(value) = st.iter.next() {
                    subscriber.on_next(value);
                    sent += 1;
                }
                if self.cancelled.load(Ordering::Acquire) {
                    break;
                }
            }

            if sent == 0 {
                // Out of demand; a later request re-enters through `wip`.
                st.subscriber = Some(subscriber);
                return;
            }
        }
    }

    fn schedule(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain();
        }
    }
}

impl<It> Subscription for IterSubscription<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if n == 0 {
            tracing::error!(stage = "iter", "protocol violation: request(0)");
            self.violated.store(true, Ordering::Release);
            self.cancelled.store(true, Ordering::Release);
        } else {
            self.demand.add(n);
        }
        self.schedule();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.schedule();
        }
    }

    fn describe(&self, out: &mut Vec<StageSnapshot>) {
        let mut snapshot = StageSnapshot::new("iter");
        snapshot.pending_demand = self.demand.get();
        snapshot.cancelled = self.cancelled.load(Ordering::Acquire);
        snapshot.terminated = self.finished.load(Ordering::Acquire);
        out.push(snapshot);
    }
}

struct FailStage {
    error: StreamError,
}

impl<T: Send + 'static> Stage<T> for FailStage {
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<T>>) {
        let mut downstream = decorate("fail", options, downstream);
        reject(downstream.as_mut(), self.error.clone());
    }
}

struct DeferStage<F> {
    factory: F,
}

impl<T, F> Stage<T> for DeferStage<F>
where
    T: Send + 'static,
    F: Fn() -> Stream<T> + Send + Sync + 'static,
{
    fn materialize(&self, options: &StageOptions, downstream: Box<dyn Subscriber<T>>) {
        (self.factory)().subscribe(decorate("defer", options, downstream));
    }
}
