//! Fan-out into a fixed number of sub-streams.

use std::sync::Arc;

use super::action::{Completion, DemandPolicy, Emitter, Operator};
use super::{Stream, UnicastProcessor};
use crate::error::StreamError;

type KeyFn<T> = Box<dyn FnMut(&T) -> u64 + Send>;

enum Routing<T> {
    RoundRobin { next: usize },
    Keyed(KeyFn<T>),
}

/// Routes every element to one of `n` sub-streams.
///
/// A sub-stream is emitted the first time an element is routed to it. On
/// completion the sub-streams that never received an element are emitted
/// already completed, so downstream always observes exactly `n` of them.
pub(crate) struct Partition<T> {
    routing: Routing<T>,
    slots: Vec<Option<Arc<UnicastProcessor<T>>>>,
}

impl<T: Send + 'static> Partition<T> {
    pub(crate) fn round_robin(n: usize) -> Self {
        Self {
            routing: Routing::RoundRobin { next: 0 },
            slots: (0..n).map(|_| None).collect(),
        }
    }

    pub(crate) fn keyed(n: usize, key: impl FnMut(&T) -> u64 + Send + 'static) -> Self {
        Self {
            routing: Routing::Keyed(Box::new(key)),
            slots: (0..n).map(|_| None).collect(),
        }
    }

    fn route(&mut self, value: &T) -> usize {
        let n = self.slots.len();
        match &mut self.routing {
            Routing::RoundRobin { next } => {
                let slot = *next;
                *next = (slot + 1) % n;
                slot
            }
            #[allow(clippy::cast_possible_truncation)]
            Routing::Keyed(key) => (key(value) % n as u64) as usize,
        }
    }

    fn slot(&mut self, index: usize, out: &mut Emitter<'_, Stream<T>>) -> Arc<UnicastProcessor<T>> {
        let slot = &mut self.slots[index];
        if let Some(processor) = slot {
            return Arc::clone(processor);
        }
        let processor = UnicastProcessor::new("partition");
        out.emit(Stream::from_processor(&processor));
        *slot = Some(Arc::clone(&processor));
        processor
    }
}

impl<T: Send + 'static> Operator<T, Stream<T>> for Partition<T> {
    fn kind(&self) -> &'static str {
        "partition"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Unbounded
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, Stream<T>>) -> Result<(), StreamError> {
        let index = self.route(&value);
        let processor = self.slot(index, out);
        out.defer(move || processor.emit(value));
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, Stream<T>>) -> Completion {
        for index in 0..self.slots.len() {
            let processor = self.slot(index, out);
            out.defer(move || processor.complete());
        }
        Completion::Now
    }

    fn on_error(&mut self, error: &StreamError, out: &mut Emitter<'_, Stream<T>>) {
        for processor in self.slots.iter().flatten() {
            let processor = Arc::clone(processor);
            let error = error.clone();
            out.defer(move || processor.fail(error));
        }
    }
}
