//! Element-wise and aggregating operators.

use std::marker::PhantomData;
use std::sync::Arc;

use super::action::{Completion, DemandPolicy, Emitter, Operator, StageHandle};
use crate::error::StreamError;

pub(crate) struct Map<F> {
    f: F,
}

impl<F> Map<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, R, F> Operator<T, R> for Map<F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnMut(T) -> Result<R, StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "map"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, R>) -> Result<(), StreamError> {
        out.emit((self.f)(value)?);
        Ok(())
    }
}

pub(crate) struct Filter<P> {
    predicate: P,
}

impl<P> Filter<P> {
    pub(crate) fn new(predicate: P) -> Self {
        Self { predicate }
    }
}

impl<T, P> Operator<T, T> for Filter<P>
where
    T: Send + 'static,
    P: FnMut(&T) -> Result<bool, StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "filter"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        if (self.predicate)(&value)? {
            out.emit(value);
        }
        Ok(())
    }
}

pub(crate) struct Observe<F> {
    f: F,
}

impl<F> Observe<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, F> Operator<T, T> for Observe<F>
where
    T: Send + 'static,
    F: FnMut(&T) -> Result<(), StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "observe"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        (self.f)(&value)?;
        out.emit(value);
        Ok(())
    }
}

pub(crate) struct ObserveSubscribe {
    hook: Arc<dyn Fn() + Send + Sync>,
}

impl ObserveSubscribe {
    pub(crate) fn new(hook: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { hook }
    }
}

impl<T: Send + 'static> Operator<T, T> for ObserveSubscribe {
    fn kind(&self) -> &'static str {
        "observe_subscribe"
    }

    fn on_start(&mut self, _handle: StageHandle<T>) {
        (self.hook)();
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        out.emit(value);
        Ok(())
    }
}

pub(crate) struct Scan<A, F> {
    acc: Option<A>,
    f: F,
}

impl<A, F> Scan<A, F> {
    pub(crate) fn new(seed: A, f: F) -> Self {
        Self { acc: Some(seed), f }
    }
}

impl<T, A, F> Operator<T, A> for Scan<A, F>
where
    T: Send + 'static,
    A: Clone + Send + 'static,
    F: FnMut(A, T) -> Result<A, StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "scan"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, A>) -> Result<(), StreamError> {
        let Some(acc) = self.acc.take() else {
            return Err(StreamError::illegal_state("scan accumulator lost"));
        };
        let next = (self.f)(acc, value)?;
        out.emit(next.clone());
        self.acc = Some(next);
        Ok(())
    }
}

pub(crate) struct Reduce<A, F> {
    acc: Option<A>,
    f: F,
}

impl<A, F> Reduce<A, F> {
    pub(crate) fn new(seed: A, f: F) -> Self {
        Self { acc: Some(seed), f }
    }
}

impl<T, A, F> Operator<T, A> for Reduce<A, F>
where
    T: Send + 'static,
    A: Send + 'static,
    F: FnMut(A, T) -> Result<A, StreamError> + Send + 'static,
{
    fn kind(&self) -> &'static str {
        "reduce"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Unbounded
    }

    fn on_next(&mut self, value: T, _out: &mut Emitter<'_, A>) -> Result<(), StreamError> {
        let Some(acc) = self.acc.take() else {
            return Err(StreamError::illegal_state("reduce accumulator lost"));
        };
        self.acc = Some((self.f)(acc, value)?);
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, A>) -> Completion {
        if let Some(acc) = self.acc.take() {
            out.emit(acc);
        }
        Completion::Now
    }
}

#[derive(Default)]
pub(crate) struct Count {
    seen: u64,
}

impl<T: Send + 'static> Operator<T, u64> for Count {
    fn kind(&self) -> &'static str {
        "count"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Unbounded
    }

    fn on_next(&mut self, _value: T, _out: &mut Emitter<'_, u64>) -> Result<(), StreamError> {
        self.seen += 1;
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, u64>) -> Completion {
        out.emit(self.seen);
        Completion::Now
    }
}

pub(crate) struct First<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> Default for First<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Operator<T, T> for First<T> {
    fn kind(&self) -> &'static str {
        "first"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        out.emit(value);
        out.complete();
        Ok(())
    }
}

pub(crate) struct Last<T> {
    last: Option<T>,
}

impl<T> Default for Last<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: Send + 'static> Operator<T, T> for Last<T> {
    fn kind(&self) -> &'static str {
        "last"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Unbounded
    }

    fn buffered(&self) -> usize {
        usize::from(self.last.is_some())
    }

    fn on_next(&mut self, value: T, _out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        self.last = Some(value);
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, T>) -> Completion {
        if let Some(last) = self.last.take() {
            out.emit(last);
        }
        Completion::Now
    }
}

/// Emits one `tracing` event per signal.
pub(crate) struct Log {
    name: Arc<str>,
    seen: u64,
}

impl Log {
    pub(crate) fn new(name: Arc<str>) -> Self {
        Self { name, seen: 0 }
    }
}

impl<T: Send + 'static> Operator<T, T> for Log {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        self.seen += 1;
        tracing::info!(stage = %self.name, seq = self.seen, "on_next");
        out.emit(value);
        Ok(())
    }

    fn on_complete(&mut self, _out: &mut Emitter<'_, T>) -> Completion {
        tracing::info!(stage = %self.name, elements = self.seen, "on_complete");
        Completion::Now
    }

    fn on_error(&mut self, error: &StreamError, _out: &mut Emitter<'_, T>) {
        tracing::info!(stage = %self.name, %error, "on_error");
    }

    fn on_request(&mut self, n: u64, _out: &mut Emitter<'_, T>) {
        tracing::info!(stage = %self.name, n, "request");
    }

    fn on_cancel(&mut self, _out: &mut Emitter<'_, T>) {
        tracing::info!(stage = %self.name, "cancel");
    }
}
