//! Hot multicast source.
//!
//! [`Broadcaster<T>`] pushes every value to the subscribers attached at the
//! moment of the push.
//!
//! # Design
//!
//! - The subscriber set is copy-on-write: `on_next` clones an `Arc` of the
//!   current slot list and iterates it without holding any lock.
//! - Each slot carries its own demand counter. A subscriber without
//!   outstanding demand misses the value; nothing is buffered per slot.
//! - Terminal signals are sticky: subscribers attaching after completion or
//!   failure receive the terminal signal immediately.
//! - With a dispatcher, every delivery is submitted as a task instead of
//!   running on the producer thread. A ring-buffer dispatcher keeps the
//!   producer's order.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::dispatch::Dispatcher;
use crate::error::{ProtocolViolation, StreamError};
use crate::reactive::{Demand, Publisher, Subscriber, Subscription, UNBOUNDED};
use crate::snapshot::StageSnapshot;
use crate::stream::Stream;

struct Slot<T> {
    id: u64,
    demand: Demand,
    cancelled: AtomicBool,
    violated: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    owner: Weak<Shared<T>>,
}

impl<T: Send + 'static> Slot<T> {
    fn deliver(&self, value: T) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.subscriber.lock();
        if let Some(subscriber) = guard.as_mut() {
            subscriber.on_next(value);
        }
        // request(0) issued from inside on_next could not take the lock
        if self.violated.load(Ordering::Acquire) {
            if let Some(mut subscriber) = guard.take() {
                drop(guard);
                subscriber.on_error(self.violation());
            }
        }
    }

    fn finish(&self, terminal: &Result<(), StreamError>) {
        let subscriber = self.subscriber.lock().take();
        if let Some(mut subscriber) = subscriber {
            match terminal {
                Ok(()) => subscriber.on_complete(),
                Err(error) => subscriber.on_error(error.clone()),
            }
        }
    }

    fn violation(&self) -> StreamError {
        ProtocolViolation::NonPositiveRequest {
            stage: "broadcaster".to_string(),
        }
        .into()
    }
}

impl<T: Send + 'static> Subscription for Slot<T> {
    fn request(&self, n: u64) {
        if n > 0 {
            self.demand.add(n);
            return;
        }
        tracing::error!(stage = "broadcaster", "protocol violation: request(0)");
        self.violated.store(true, Ordering::Release);
        self.cancel();
        let subscriber = self.subscriber.try_lock().and_then(|mut guard| guard.take());
        if let Some(mut subscriber) = subscriber {
            subscriber.on_error(self.violation());
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.remove(self.id);
        }
    }

    fn describe(&self, out: &mut Vec<StageSnapshot>) {
        let mut snapshot = StageSnapshot::new("broadcaster");
        snapshot.pending_demand = self.demand.get();
        snapshot.cancelled = self.cancelled.load(Ordering::Acquire);
        snapshot.terminated = self
            .subscriber
            .try_lock()
            .map_or(false, |guard| guard.is_none());
        out.push(snapshot);
    }
}

struct Registry<T> {
    slots: Arc<Vec<Arc<Slot<T>>>>,
    terminal: Option<Result<(), StreamError>>,
}

struct Shared<T> {
    registry: RwLock<Registry<T>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    next_id: AtomicU64,
}

impl<T> Shared<T> {
    fn remove(&self, id: u64) {
        let mut registry = self.registry.write();
        if registry.slots.iter().any(|s| s.id == id) {
            let remaining: Vec<_> = registry
                .slots
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect();
            registry.slots = Arc::new(remaining);
        }
    }
}

/// Hot multicast source with a dynamic subscriber set.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates a broadcaster delivering on the producer thread.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a broadcaster delivering through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::build(Some(dispatcher))
    }

    fn build(dispatcher: Option<Arc<dyn Dispatcher>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry {
                    slots: Arc::new(Vec::new()),
                    terminal: None,
                }),
                dispatcher,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Pushes `value` to every current subscriber with outstanding demand.
    pub fn on_next(&self, value: T) {
        let slots = {
            let registry = self.shared.registry.read();
            if registry.terminal.is_some() {
                tracing::debug!("value pushed to a terminated broadcaster dropped");
                return;
            }
            Arc::clone(&registry.slots)
        };

        for slot in slots.iter() {
            if slot.cancelled.load(Ordering::Acquire) || !slot.demand.try_consume(1) {
                continue;
            }
            match &self.shared.dispatcher {
                Some(dispatcher) => {
                    let slot = Arc::clone(slot);
                    let value = value.clone();
                    if let Err(err) = dispatcher.dispatch(Box::new(move || slot.deliver(value))) {
                        tracing::warn!(error = %err, "broadcast delivery dropped");
                    }
                }
                None => slot.deliver(value.clone()),
            }
        }
    }

    /// Completes every subscriber, present and future.
    pub fn on_complete(&self) {
        self.terminate(Ok(()));
    }

    /// Fails every subscriber, present and future.
    pub fn on_error(&self, error: StreamError) {
        self.terminate(Err(error));
    }

    fn terminate(&self, terminal: Result<(), StreamError>) {
        let slots = {
            let mut registry = self.shared.registry.write();
            if registry.terminal.is_some() {
                return;
            }
            registry.terminal = Some(terminal.clone());
            std::mem::replace(&mut registry.slots, Arc::new(Vec::new()))
        };

        for slot in slots.iter() {
            let Some(dispatcher) = &self.shared.dispatcher else {
                slot.finish(&terminal);
                continue;
            };
            let task_slot = Arc::clone(slot);
            let task_terminal = terminal.clone();
            let task = Box::new(move || task_slot.finish(&task_terminal));
            if let Err(err) = dispatcher.dispatch(task) {
                tracing::warn!(error = %err, "broadcast terminal delivered inline");
                slot.finish(&terminal);
            }
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.read().slots.len()
    }

    /// Returns true once completed or failed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.registry.read().terminal.is_some()
    }

    /// A stream attaching a new subscriber to this broadcaster per
    /// materialization.
    #[must_use]
    pub fn stream(&self) -> Stream<T> {
        Stream::from_publisher(Arc::new(self.clone()))
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for Broadcaster<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let slot = Arc::new(Slot {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            demand: Demand::new(),
            cancelled: AtomicBool::new(false),
            violated: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            owner: Arc::downgrade(&self.shared),
        });

        subscriber.on_subscribe(Arc::clone(&slot) as Arc<dyn Subscription>);
        *slot.subscriber.lock() = Some(subscriber);
        if slot.violated.load(Ordering::Acquire) {
            slot.finish(&Err(slot.violation()));
            return;
        }

        let terminal = {
            let mut registry = self.shared.registry.write();
            match &registry.terminal {
                Some(terminal) => Some(terminal.clone()),
                None => {
                    if !slot.cancelled.load(Ordering::Acquire) {
                        let mut slots = Vec::with_capacity(registry.slots.len() + 1);
                        slots.extend(registry.slots.iter().cloned());
                        slots.push(Arc::clone(&slot));
                        registry.slots = Arc::new(slots);
                    }
                    None
                }
            }
        };
        if let Some(terminal) = terminal {
            slot.finish(&terminal);
        }
    }
}

/// Lets a broadcaster subscribe to a stream and re-publish it.
impl<T: Clone + Send + 'static> Subscriber<T> for Broadcaster<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.is_terminated() {
            subscription.cancel();
        } else {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, value: T) {
        Broadcaster::on_next(self, value);
    }

    fn on_error(&mut self, error: StreamError) {
        Broadcaster::on_error(self, error);
    }

    fn on_complete(&mut self) {
        Broadcaster::on_complete(self);
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.read();
        f.debug_struct("Broadcaster")
            .field("subscribers", &registry.slots.len())
            .field("terminated", &registry.terminal.is_some())
            .field(
                "dispatcher",
                &self.shared.dispatcher.as_ref().map(|d| d.name().to_string()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatcherConfig, RingBufferDispatcher};
    use crate::error::FailureKind;
    use crate::stream::test_support::{collect, recorder};
    use crate::stream::Streams;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_every_subscriber_with_demand_receives() {
        let b = Broadcaster::<u32>::new();
        let (p1, h1) = recorder(10);
        let (p2, h2) = recorder(10);
        b.subscribe(Box::new(p1));
        b.subscribe(Box::new(p2));
        assert_eq!(b.subscriber_count(), 2);

        b.on_next(1);
        b.on_next(2);
        assert_eq!(h1.values(), vec![1, 2]);
        assert_eq!(h2.values(), vec![1, 2]);
    }

    #[test]
    fn test_subscriber_without_demand_misses_values() {
        let b = Broadcaster::<u32>::new();
        let (p, h) = recorder(1);
        b.subscribe(Box::new(p));

        b.on_next(1);
        b.on_next(2);
        h.request(1);
        b.on_next(3);
        assert_eq!(h.values(), vec![1, 3]);
    }

    #[test]
    fn test_late_subscriber_sees_terminal() {
        let b = Broadcaster::<u32>::new();
        b.on_error(StreamError::illegal_state("closed"));
        b.on_next(1);

        let (p, h) = recorder(1);
        b.subscribe(Box::new(p));
        assert_eq!(h.error().map(|e| e.kind()), Some(FailureKind::IllegalState));
        assert!(h.values().is_empty());
        assert!(b.is_terminated());
    }

    #[test]
    fn test_cancel_detaches() {
        let b = Broadcaster::<u32>::new();
        let (p, h) = recorder(5);
        b.subscribe(Box::new(p));
        h.cancel();
        h.cancel();
        assert_eq!(b.subscriber_count(), 0);

        b.on_next(1);
        b.on_complete();
        assert!(h.values().is_empty());
        assert!(!h.is_complete());
    }

    #[test]
    fn test_request_zero_fails_subscriber() {
        let b = Broadcaster::<u32>::new();
        let (p, h) = recorder(0);
        b.subscribe(Box::new(p));
        h.request(0);
        assert_eq!(h.error().map(|e| e.kind()), Some(FailureKind::Protocol));
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn test_dispatched_delivery_keeps_order() {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(
            RingBufferDispatcher::new(&DispatcherConfig::builder().name("bcast").build()).unwrap(),
        );
        let b = Broadcaster::<u32>::with_dispatcher(Arc::clone(&dispatcher));
        let (tx, rx) = mpsc::channel();
        let done = tx.clone();
        let control = b.stream().consume_with(
            move |v| tx.send(Some(v)).unwrap(),
            |_| {},
            move || done.send(None).unwrap(),
        );

        for i in 0..500 {
            b.on_next(i);
        }
        b.on_complete();

        let received: Vec<u32> = (0..=500)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .map_while(|v| v)
            .collect();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
        assert!(control.wait_terminated(Duration::from_secs(1)));
        dispatcher.shutdown();
    }

    #[test]
    fn test_republishes_a_stream() {
        let b = Broadcaster::<i64>::new();
        let (p, h) = recorder(100);
        b.subscribe(Box::new(p));

        Streams::range(0, 3).subscribe(Box::new(b.clone()));
        assert_eq!(h.values(), vec![0, 1, 2]);
        assert!(h.is_complete());
        assert!(collect(&b.stream()).unwrap().is_empty());
    }
}
