//! Terminal consumers and the handle returned to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::Stream;
use crate::dispatch::Dispatcher;
use crate::error::StreamError;
use crate::reactive::{Subscriber, Subscription, UNBOUNDED};
use crate::snapshot::PipelineSnapshot;

struct ControlState {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    cancelled: AtomicBool,
    terminated: Mutex<bool>,
    done: Condvar,
}

impl ControlState {
    fn mark_terminated(&self) {
        *self.terminated.lock() = true;
        self.done.notify_all();
    }
}

/// Handle to a running pipeline.
#[derive(Clone)]
pub struct Control {
    state: Arc<ControlState>,
}

impl Control {
    fn new() -> Self {
        Self {
            state: Arc::new(ControlState {
                subscription: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                terminated: Mutex::new(false),
                done: Condvar::new(),
            }),
        }
    }

    /// Cancels the pipeline. Idempotent.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = self.state.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        self.state.mark_terminated();
    }

    /// Returns true once the pipeline completed, failed or was cancelled.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self.state.terminated.lock()
    }

    /// Blocks until the pipeline terminates or `timeout` elapses. Returns
    /// true if it terminated.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let mut terminated = self.state.terminated.lock();
        if !*terminated {
            let _ = self
                .state
                .done
                .wait_while_for(&mut terminated, |t| !*t, timeout);
        }
        *terminated
    }

    /// Structured view of every stage, the stage closest to the consumer
    /// first.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        let subscription = self.state.subscription.lock().clone();
        let mut stages = Vec::new();
        if let Some(subscription) = subscription {
            subscription.describe(&mut stages);
        }
        PipelineSnapshot { stages }
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("cancelled", &self.state.cancelled.load(Ordering::Acquire))
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Subscriber requesting unbounded demand and forwarding to closures.
struct Consumer<N, E, C> {
    control: Arc<ControlState>,
    next: N,
    error: Option<E>,
    complete: Option<C>,
}

impl<T, N, E, C> Subscriber<T> for Consumer<N, E, C>
where
    N: FnMut(T) + Send,
    E: FnOnce(StreamError) + Send,
    C: FnOnce() + Send,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.control.subscription.lock() = Some(Arc::clone(&subscription));
        if self.control.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
        } else {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, value: T) {
        (self.next)(value);
    }

    fn on_error(&mut self, error: StreamError) {
        if let Some(handler) = self.error.take() {
            handler(error);
        }
        self.control.mark_terminated();
    }

    fn on_complete(&mut self) {
        if let Some(complete) = self.complete.take() {
            complete();
        }
        self.control.mark_terminated();
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Consumes every element with `f`. Failures are logged.
    pub fn consume<F>(&self, f: F) -> Control
    where
        F: FnMut(T) + Send + 'static,
    {
        self.consume_with(
            f,
            |error| tracing::warn!(%error, "stream failed without an error consumer"),
            || {},
        )
    }

    /// Consumes every element with `next`, then calls exactly one of
    /// `error` or `complete`.
    pub fn consume_with<N, E, C>(&self, next: N, error: E, complete: C) -> Control
    where
        N: FnMut(T) + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let control = Control::new();
        self.subscribe(Box::new(Consumer {
            control: Arc::clone(&control.state),
            next,
            error: Some(error),
            complete: Some(complete),
        }));
        control
    }

    /// [`consume_with`](Self::consume_with) with every callback run on
    /// `dispatcher`.
    pub fn consume_on<N, E, C>(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        next: N,
        error: E,
        complete: C,
    ) -> Control
    where
        N: FnMut(T) + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.dispatch_on(dispatcher).consume_with(next, error, complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Streams;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_consume_terminates() {
        let total = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&total);
        let control = Streams::range(1, 11).consume(move |v| {
            t.fetch_add(v as usize, Ordering::SeqCst);
        });
        assert!(control.wait_terminated(Duration::from_secs(1)));
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }

    #[test]
    fn test_error_callback() {
        let failed = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&failed);
        let control = Streams::fail::<u8>(StreamError::illegal_state("x")).consume_with(
            |_| {},
            move |_| f.store(true, Ordering::SeqCst),
            || panic!("must not complete"),
        );
        assert!(control.is_terminated());
        assert!(failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_snapshot_lists_stages() {
        let timer = crate::timer::Timer::new("snapshot").unwrap();
        let control = Streams::range(0, 10)
            .map(Ok)
            .buffer(4)
            .take(Duration::from_secs(60), &timer)
            .consume(|_| {});

        let snapshot = control.snapshot();
        let kinds: Vec<_> = snapshot.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["take", "buffer", "map", "iter"]);
        assert!(snapshot.stages.iter().all(|s| s.terminated));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["stages"][1]["kind"], "buffer");
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let timer = crate::timer::Timer::new("cancel").unwrap();
        let control = Streams::range(0, 10)
            .take(Duration::from_secs(60), &timer)
            .request_when(|demand| demand.map(|_| Ok(1)))
            .consume(|_| {});
        control.cancel();
        control.cancel();
        assert!(control.is_terminated());
        assert!(control.snapshot().stages[0].cancelled);
    }

    #[test]
    fn test_consume_on_runs_callbacks_on_dispatcher() {
        use crate::dispatch::{DispatcherConfig, RingBufferDispatcher};
        use std::sync::mpsc;
        use std::thread;

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(
            RingBufferDispatcher::new(&DispatcherConfig::builder().name("consumer").build())
                .unwrap(),
        );
        let (tx, rx) = mpsc::channel();
        let on_next = tx.clone();
        let control = Streams::range(0, 4).capacity(4).consume_on(
            Arc::clone(&dispatcher),
            move |v| {
                let name = thread::current().name().map(str::to_string);
                on_next.send((Some(v), name)).unwrap();
            },
            |_| panic!("must not fail"),
            move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((None, name)).unwrap();
            },
        );

        let signals: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        let values: Vec<_> = signals.iter().filter_map(|(v, _)| *v).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert_eq!(signals[4].0, None);
        assert!(signals
            .iter()
            .all(|(_, name)| name.as_deref() == Some("riptide-consumer")));
        assert!(control.wait_terminated(Duration::from_secs(5)));
        dispatcher.shutdown();
    }
}
