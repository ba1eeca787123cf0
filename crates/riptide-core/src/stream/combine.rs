//! Reusable processors built from a chain, and hot re-publishing.
//!
//! A [`Processor`] is a subscriber on its input side and a publisher on its
//! output side. Values pushed into it, directly or by subscribing it to
//! other streams, run through the chain it was built with.

use std::fmt;
use std::sync::Arc;

use super::processor::UnicastProcessor;
use super::source::Streams;
use super::Stream;
use crate::error::StreamError;
use crate::reactive::{Publisher, Subscriber, Subscription, UNBOUNDED};

/// Subscriber and publisher in one, wrapping an operator chain.
///
/// Input is queued until the output is subscribed, so a processor may be
/// fed before anything consumes it. The output accepts a single subscriber.
/// The first terminal signal from any input terminates the processor.
pub struct Processor<I, O> {
    input: Arc<UnicastProcessor<I>>,
    output: Stream<O>,
    upstream: Option<Arc<dyn Subscription>>,
}

impl<I, O> Clone for Processor<I, O> {
    fn clone(&self) -> Self {
        Self {
            input: Arc::clone(&self.input),
            output: self.output.clone(),
            upstream: None,
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Processor<I, O> {
    fn new<F>(chain: F) -> Self
    where
        F: FnOnce(Stream<I>) -> Stream<O>,
    {
        let input = UnicastProcessor::new("combine");
        let output = chain(Stream::from_processor(&input));
        Self {
            input,
            output,
            upstream: None,
        }
    }

    /// Pushes a value into the chain.
    pub fn on_next(&self, value: I) {
        self.input.emit(value);
    }

    /// Completes the chain's input.
    pub fn on_complete(&self) {
        self.input.complete();
    }

    /// Fails the chain's input.
    pub fn on_error(&self, error: StreamError) {
        self.input.fail(error);
    }

    /// The chain's output.
    #[must_use]
    pub fn stream(&self) -> Stream<O> {
        self.output.clone()
    }

    fn cancel_upstream_if_cancelled(&mut self) {
        if self.input.is_cancelled() {
            if let Some(upstream) = self.upstream.take() {
                upstream.cancel();
            }
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Subscriber<I> for Processor<I, O> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.input.is_cancelled() || self.upstream.is_some() {
            subscription.cancel();
            return;
        }
        self.upstream = Some(Arc::clone(&subscription));
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, value: I) {
        self.input.emit(value);
        self.cancel_upstream_if_cancelled();
    }

    fn on_error(&mut self, error: StreamError) {
        self.upstream = None;
        self.input.fail(error);
    }

    fn on_complete(&mut self) {
        self.upstream = None;
        self.input.complete();
    }
}

impl<I: Send + 'static, O: Send + 'static> Publisher<O> for Processor<I, O> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<O>>) {
        self.output.subscribe(subscriber);
    }
}

impl<I, O> fmt::Debug for Processor<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("attached", &self.upstream.is_some())
            .finish_non_exhaustive()
    }
}

impl Streams {
    /// Builds a [`Processor`] whose pushed values flow through `chain`.
    ///
    /// `chain` receives the processor's input as a stream and returns the
    /// processor's output.
    #[must_use]
    pub fn combine<I, O, F>(chain: F) -> Processor<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(Stream<I>) -> Stream<O>,
    {
        Processor::new(chain)
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Subscribes `subscriber` and hands it back, so a hot target such as a
    /// [`Processor`] or a [`Broadcaster`](crate::Broadcaster) can be fed and
    /// then consumed in one expression.
    pub fn broadcast_to<S>(&self, subscriber: S) -> S
    where
        S: Subscriber<T> + Clone + 'static,
    {
        self.subscribe(Box::new(subscriber.clone()));
        subscriber
    }
}
