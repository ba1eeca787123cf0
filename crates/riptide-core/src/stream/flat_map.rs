//! Map to inner streams and merge them.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::action::{Completion, DemandPolicy, Emitter, InnerEvent, Operator, StageHandle};
use super::Stream;
use crate::error::StreamError;
use crate::reactive::{add_demand, sub_demand, Subscriber, Subscription};

struct Inner {
    subscription: Option<Arc<dyn Subscription>>,
    /// Requested from the inner and not yet received.
    outstanding: u64,
}

/// Subscribes to one inner stream per upstream element.
///
/// At most `max_concurrency` inners are live at once; upstream is asked for
/// one more element each time an inner completes. Inners are only asked for
/// what downstream requested, at most `prefetch` each, and are topped up
/// once half of their prefetch has arrived. The stage completes after
/// upstream and every inner completed; the first inner failure fails the
/// stage and cancels the remaining inners.
pub(crate) struct FlatMap<F, R> {
    f: F,
    prefetch: u64,
    max_concurrency: u64,
    handle: Option<StageHandle<R>>,
    inners: BTreeMap<u64, Inner>,
    /// Downstream demand not yet handed to an inner.
    credit: u64,
    next_id: u64,
    started: bool,
    outer_done: bool,
}

impl<F, R: 'static> FlatMap<F, R> {
    pub(crate) fn new(max_concurrency: u64, prefetch: u64, f: F) -> Self {
        Self {
            f,
            prefetch: prefetch.max(1),
            max_concurrency: max_concurrency.max(1),
            handle: None,
            inners: BTreeMap::new(),
            credit: 0,
            next_id: 0,
            started: false,
            outer_done: false,
        }
    }

    fn replenish_limit(&self) -> u64 {
        (self.prefetch / 2).max(1)
    }

    /// Hands downstream credit to subscribed inners in arrival order.
    fn distribute(&mut self, out: &mut Emitter<'_, R>) {
        let limit = self.replenish_limit();
        for inner in self.inners.values_mut() {
            if self.credit == 0 {
                break;
            }
            let Some(subscription) = inner.subscription.as_ref() else {
                continue;
            };
            let room = self.prefetch.saturating_sub(inner.outstanding);
            if room == 0 || (inner.outstanding > 0 && room < limit) {
                continue;
            }
            let grant = room.min(self.credit);
            inner.outstanding += grant;
            self.credit = sub_demand(self.credit, grant);
            let subscription = Arc::clone(subscription);
            out.defer(move || subscription.request(grant));
        }
    }

    fn request_outer(&self, n: u64, out: &mut Emitter<'_, R>) {
        if let Some(handle) = self.handle.clone() {
            out.defer(move || handle.request_upstream(n));
        }
    }

    fn cancel_all(&mut self, out: &mut Emitter<'_, R>) {
        let subscriptions: Vec<_> = std::mem::take(&mut self.inners)
            .into_values()
            .filter_map(|inner| inner.subscription)
            .collect();
        if !subscriptions.is_empty() {
            out.defer(move || subscriptions.iter().for_each(|s| s.cancel()));
        }
    }
}

impl<T, R, F> Operator<T, R> for FlatMap<F, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnMut(T) -> Result<Stream<R>, StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "flat_map"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Manual
    }

    fn on_start(&mut self, handle: StageHandle<R>) {
        self.handle = Some(handle);
    }

    fn on_request(&mut self, n: u64, out: &mut Emitter<'_, R>) {
        self.credit = add_demand(self.credit, n);
        if !self.started {
            self.started = true;
            self.request_outer(self.max_concurrency, out);
        }
        self.distribute(out);
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, R>) -> Result<(), StreamError> {
        let inner = (self.f)(value)?;
        let Some(handle) = self.handle.clone() else {
            return Err(StreamError::illegal_state("flat_map started without a handle"));
        };

        let id = self.next_id;
        self.next_id += 1;
        self.inners.insert(
            id,
            Inner {
                subscription: None,
                outstanding: 0,
            },
        );
        out.defer(move || inner.subscribe(Box::new(InnerSubscriber { id, handle })));
        Ok(())
    }

    fn on_inner(
        &mut self,
        id: u64,
        event: InnerEvent<R>,
        out: &mut Emitter<'_, R>,
    ) -> Result<(), StreamError> {
        match event {
            InnerEvent::Subscribed(subscription) => match self.inners.get_mut(&id) {
                Some(inner) => {
                    inner.subscription = Some(subscription);
                    self.distribute(out);
                }
                None => out.defer(move || subscription.cancel()),
            },
            InnerEvent::Next(value) => {
                if let Some(inner) = self.inners.get_mut(&id) {
                    inner.outstanding = inner.outstanding.saturating_sub(1);
                }
                out.emit(value);
                self.distribute(out);
            }
            InnerEvent::Complete => {
                if let Some(inner) = self.inners.remove(&id) {
                    self.credit = add_demand(self.credit, inner.outstanding);
                    if !self.outer_done {
                        self.request_outer(1, out);
                    }
                }
                if self.outer_done && self.inners.is_empty() {
                    out.complete();
                } else {
                    self.distribute(out);
                }
            }
            InnerEvent::Error(error) => {
                self.inners.remove(&id);
                if self.outer_done && self.inners.is_empty() {
                    out.complete();
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn on_complete(&mut self, _out: &mut Emitter<'_, R>) -> Completion {
        self.outer_done = true;
        if self.inners.is_empty() {
            Completion::Now
        } else {
            Completion::Deferred
        }
    }

    fn on_error(&mut self, _error: &StreamError, out: &mut Emitter<'_, R>) {
        self.cancel_all(out);
    }

    fn on_cancel(&mut self, out: &mut Emitter<'_, R>) {
        self.cancel_all(out);
    }
}

/// Forwards an inner stream's signals into the owning stage.
struct InnerSubscriber<R> {
    id: u64,
    handle: StageHandle<R>,
}

impl<R: Send + 'static> Subscriber<R> for InnerSubscriber<R> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.handle
            .inner(self.id, InnerEvent::Subscribed(subscription));
    }

    fn on_next(&mut self, value: R) {
        self.handle.inner(self.id, InnerEvent::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.handle.inner(self.id, InnerEvent::Error(error));
    }

    fn on_complete(&mut self) {
        self.handle.inner(self.id, InnerEvent::Complete);
    }
}

#[cfg(test)]
mod tests {
    use crate::broadcaster::Broadcaster;
    use crate::dispatch::{Dispatcher, DispatcherConfig, RingBufferDispatcher};
    use crate::error::{FailureKind, StreamError};
    use crate::stream::test_support::{collect, recorder};
    use crate::stream::Streams;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting(
        pulled: &Arc<AtomicU64>,
    ) -> impl FnMut(&i64) -> Result<(), StreamError> + Clone + Send + Sync + 'static {
        let pulled = Arc::clone(pulled);
        move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_flat_map_concatenates_synchronous_inners() {
        let out = collect(&Streams::range(1, 4).flat_map(|n| Ok(Streams::range(0, n)))).unwrap();
        assert_eq!(out, vec![0, 0, 1, 0, 1, 2]);
    }

    #[test]
    fn test_merge_product() {
        let merged = Streams::merge(vec![
            Streams::just(vec!["1", "2"]),
            Streams::just(vec!["3", "4", "5"]),
        ])
        .capacity(5)
        .map(|s: &str| Ok(s.parse::<i32>()?))
        .reduce(1, |acc, v| Ok(acc * v));
        assert_eq!(collect(&merged).unwrap(), vec![120]);
    }

    #[test]
    fn test_inner_larger_than_prefetch() {
        let out = collect(
            &Streams::just(vec![1_000i64]).flat_map_with_prefetch(4, |n| Ok(Streams::range(0, n))),
        )
        .unwrap();
        assert_eq!(out.len(), 1_000);
        assert!(out.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_inner_failure_fails_stage() {
        let out = collect(&Streams::range(0, 3).flat_map(|n| {
            if n == 1 {
                Ok(Streams::fail(StreamError::illegal_argument("one")))
            } else {
                Ok(Streams::range(0, 2))
            }
        }));
        assert_eq!(out.unwrap_err().kind(), FailureKind::IllegalArgument);
    }

    #[test]
    fn test_inners_on_dispatcher_keep_per_source_order() {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(
            RingBufferDispatcher::new(&DispatcherConfig::builder().name("flat").build()).unwrap(),
        );
        let d = Arc::clone(&dispatcher);
        let out = collect(&Streams::range(0, 4).flat_map(move |k| {
            Ok(Streams::range(0, 250)
                .map(move |v| Ok((k, v)))
                .dispatch_on(Arc::clone(&d)))
        }))
        .unwrap();
        assert_eq!(out.len(), 1_000);
        for k in 0..4 {
            let seq: Vec<i64> = out.iter().filter(|(s, _)| *s == k).map(|(_, v)| *v).collect();
            assert_eq!(seq, (0..250).collect::<Vec<_>>());
        }
        dispatcher.shutdown();
    }

    #[test]
    fn test_inner_pull_follows_downstream_demand() {
        let pulled = Arc::new(AtomicU64::new(0));
        let observe = counting(&pulled);
        let stream = Streams::just(vec![1])
            .flat_map(move |_| Ok(Streams::range(0, 100_000).observe(observe.clone())));
        let (subscriber, handle) = recorder(1);
        stream.subscribe(Box::new(subscriber));

        assert_eq!(handle.values(), vec![0]);
        assert!(pulled.load(Ordering::SeqCst) <= 1);

        handle.request(10);
        assert_eq!(handle.values(), (0..11).collect::<Vec<_>>());
        assert!(pulled.load(Ordering::SeqCst) <= 11);
        handle.cancel();
    }

    #[test]
    fn test_concurrent_inners_are_bounded() {
        let pulled = Arc::new(AtomicU64::new(0));
        let gate = Broadcaster::<i64>::new();
        let inner = gate.clone();
        let control = Streams::range(0, 100)
            .observe(counting(&pulled))
            .flat_map_bounded(4, 8, move |_| Ok(inner.stream()))
            .consume(|_| {});

        assert_eq!(pulled.load(Ordering::SeqCst), 4);
        assert!(!control.is_terminated());

        gate.on_complete();
        assert!(control.wait_terminated(Duration::from_secs(5)));
        assert_eq!(pulled.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_merge_subscribes_every_source() {
        let gate = Broadcaster::<i64>::new();
        let (subscriber, handle) = recorder(u64::MAX);
        Streams::merge(vec![
            gate.stream(),
            gate.stream(),
            gate.stream(),
            Streams::just(vec![7]),
        ])
        .subscribe(Box::new(subscriber));

        assert_eq!(handle.values(), vec![7]);
        assert_eq!(gate.subscriber_count(), 3);
        gate.on_complete();
        assert!(handle.is_complete());
    }
}
