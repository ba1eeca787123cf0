//! Demand shaping: downstream requests pass through a user stream before
//! reaching upstream.

use std::sync::Arc;

use super::action::{Completion, DemandPolicy, Emitter, Operator, StageHandle};
use super::{Control, Stream};
use crate::broadcaster::Broadcaster;
use crate::error::StreamError;

pub(crate) type DemandShaper = Arc<dyn Fn(Stream<u64>) -> Stream<u64> + Send + Sync>;

pub(crate) struct RequestWhen {
    shaper: DemandShaper,
    feed: Broadcaster<u64>,
    control: Option<Control>,
}

impl RequestWhen {
    pub(crate) fn new(shaper: DemandShaper) -> Self {
        Self {
            shaper,
            feed: Broadcaster::new(),
            control: None,
        }
    }

    fn stop<T>(&mut self, out: &mut Emitter<'_, T>) {
        if let Some(control) = self.control.take() {
            control.cancel();
        }
        let feed = self.feed.clone();
        out.defer(move || feed.on_complete());
    }
}

impl<T: Send + 'static> Operator<T, T> for RequestWhen {
    fn kind(&self) -> &'static str {
        "request_when"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Manual
    }

    fn on_start(&mut self, handle: StageHandle<T>) {
        let shaped = (self.shaper)(self.feed.stream());
        self.control = Some(shaped.consume_with(
            move |n| handle.request_upstream(n),
            |error| tracing::warn!(%error, "demand stream failed"),
            || {},
        ));
    }

    fn on_request(&mut self, n: u64, out: &mut Emitter<'_, T>) {
        let feed = self.feed.clone();
        out.defer(move || feed.on_next(n));
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        out.emit(value);
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, T>) -> Completion {
        self.stop(out);
        Completion::Now
    }

    fn on_error(&mut self, _error: &StreamError, out: &mut Emitter<'_, T>) {
        self.stop(out);
    }

    fn on_cancel(&mut self, out: &mut Emitter<'_, T>) {
        self.stop(out);
    }
}

#[cfg(test)]
mod tests {
    use crate::stream::test_support::{collect, recorder};
    use crate::stream::Streams;

    #[test]
    fn test_demand_is_reshaped() {
        let stream = Streams::range(0, 10).request_when(|demand| demand.map(|n| Ok(n.min(2))));
        let (p, handle) = recorder(5);
        stream.subscribe(Box::new(p));
        assert_eq!(handle.values(), vec![0, 1]);

        handle.request(1);
        assert_eq!(handle.values(), vec![0, 1, 2]);
    }

    #[test]
    fn test_passthrough_shaper_delivers_everything() {
        let stream = Streams::range(0, 100).request_when(|demand| demand);
        assert_eq!(collect(&stream).unwrap().len(), 100);
    }
}
