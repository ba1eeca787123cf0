//! Single-subscriber buffering processor.
//!
//! Feeds sub-streams (window, partition), promise streams and barrier
//! output. Producers push without waiting for demand; the processor queues
//! until its one subscriber requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::reactive::{reject, Demand, Publisher, Subscriber, Subscription};
use crate::snapshot::StageSnapshot;

struct Queue<T> {
    values: VecDeque<T>,
    terminal: Option<Result<(), StreamError>>,
    subscribed: bool,
}

pub(crate) struct UnicastProcessor<T> {
    kind: &'static str,
    queue: Mutex<Queue<T>>,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    demand: Demand,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl<T: Send + 'static> UnicastProcessor<T> {
    pub(crate) fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            queue: Mutex::new(Queue {
                values: VecDeque::new(),
                terminal: None,
                subscribed: false,
            }),
            subscriber: Mutex::new(None),
            demand: Demand::new(),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    /// Queues a value without delivering it. Pair with [`drain`](Self::drain).
    pub(crate) fn push(&self, value: T) {
        let mut queue = self.queue.lock();
        if queue.terminal.is_none() && !self.cancelled.load(Ordering::Acquire) {
            queue.values.push_back(value);
        }
    }

    /// Queues and delivers a value.
    pub(crate) fn emit(&self, value: T) {
        self.push(value);
        self.drain();
    }

    pub(crate) fn complete(&self) {
        self.terminate(Ok(()));
    }

    /// True once the subscriber cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn fail(&self, error: StreamError) {
        self.terminate(Err(error));
    }

    fn terminate(&self, terminal: Result<(), StreamError>) {
        {
            let mut queue = self.queue.lock();
            if queue.terminal.is_some() {
                return;
            }
            queue.terminal = Some(terminal);
        }
        self.drain();
    }

    /// Delivers queued values as demand allows.
    pub(crate) fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.deliver();
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }

    fn deliver(&self) {
        let mut guard = self.subscriber.lock();
        let Some(subscriber) = guard.as_mut() else {
            return;
        };

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                guard.take();
                self.queue.lock().values.clear();
                return;
            }

            let (value, terminal) = {
                let mut queue = self.queue.lock();
                if queue.values.is_empty() {
                    (None, queue.terminal.clone())
                } else if self.demand.try_consume(1) {
                    (queue.values.pop_front(), None)
                } else {
                    (None, None)
                }
            };

            match (value, terminal) {
                (Some(value), _) => subscriber.on_next(value),
                (None, Some(terminal)) => {
                    self.finished.store(true, Ordering::Release);
                    match terminal {
                        Ok(()) => subscriber.on_complete(),
                        Err(error) => subscriber.on_error(error),
                    }
                    guard.take();
                    return;
                }
                (None, None) => return,
            }
        }
    }
}

impl<T: Send + 'static> Publisher<T> for Arc<UnicastProcessor<T>> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        {
            let mut queue = self.queue.lock();
            if queue.subscribed {
                drop(queue);
                reject(
                    subscriber.as_mut(),
                    StreamError::illegal_state(format!(
                        "{} sub-stream allows a single subscriber",
                        self.kind
                    )),
                );
                return;
            }
            queue.subscribed = true;
        }

        subscriber.on_subscribe(Arc::new(ProcessorSubscription {
            processor: Arc::clone(self),
        }));
        *self.subscriber.lock() = Some(subscriber);
        self.drain();
    }
}

struct ProcessorSubscription<T> {
    processor: Arc<UnicastProcessor<T>>,
}

impl<T: Send + 'static> Subscription for ProcessorSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::error!(stage = self.processor.kind, "protocol violation: request(0)");
            self.processor.fail(StreamError::from(
                crate::error::ProtocolViolation::NonPositiveRequest {
                    stage: self.processor.kind.to_string(),
                },
            ));
            return;
        }
        self.processor.demand.add(n);
        self.processor.drain();
    }

    fn cancel(&self) {
        if !self.processor.cancelled.swap(true, Ordering::AcqRel) {
            self.processor.drain();
        }
    }

    fn describe(&self, out: &mut Vec<StageSnapshot>) {
        let mut snapshot = StageSnapshot::new(self.processor.kind);
        snapshot.pending_demand = self.processor.demand.get();
        snapshot.buffered = self.processor.queue.lock().values.len();
        snapshot.cancelled = self.processor.cancelled.load(Ordering::Acquire);
        snapshot.terminated = self.processor.finished.load(Ordering::Acquire);
        out.push(snapshot);
    }
}

impl<T: Send + 'static> super::Stream<T> {
    pub(crate) fn from_processor(processor: &Arc<UnicastProcessor<T>>) -> Self {
        Self::from_publisher(Arc::new(Arc::clone(processor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::stream::test_support::recorder;
    use crate::stream::Stream;

    #[test]
    fn test_buffers_until_requested() {
        let processor = UnicastProcessor::new("window");
        processor.emit(1);
        processor.emit(2);
        processor.emit(3);
        processor.complete();

        let (p, handle) = recorder(0);
        Stream::from_processor(&processor).subscribe(Box::new(p));
        assert!(handle.values().is_empty());

        handle.request(2);
        assert_eq!(handle.values(), vec![1, 2]);
        assert!(!handle.is_complete());

        handle.request(1);
        assert_eq!(handle.values(), vec![1, 2, 3]);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_second_subscriber_rejected() {
        let processor = UnicastProcessor::<u8>::new("partition");
        let stream = Stream::from_processor(&processor);
        let (first, _h1) = recorder(1);
        let (second, h2) = recorder(1);
        stream.subscribe(Box::new(first));
        stream.subscribe(Box::new(second));
        assert_eq!(h2.error().unwrap().kind(), FailureKind::IllegalState);
    }

    #[test]
    fn test_failure_after_values() {
        let processor = UnicastProcessor::new("window");
        let (p, handle) = recorder(10);
        Stream::from_processor(&processor).subscribe(Box::new(p));
        processor.emit("a");
        processor.fail(StreamError::illegal_argument("late"));
        processor.emit("b");
        assert_eq!(handle.values(), vec!["a"]);
        assert!(handle.error().is_some());
    }
}
