//! Timer driven operators.

use std::time::Duration;

use super::action::{Completion, DemandPolicy, Emitter, Operator, StageHandle};
use crate::error::{FailureKind, StreamError};
use crate::timer::{Timer, TimerError, TimerRegistration};

fn timer_failure(error: TimerError) -> StreamError {
    StreamError::with_source(FailureKind::IllegalState, "timer unavailable", error)
}

/// Emits the latest element once per interval.
///
/// The first element of a quiet period arms the timer; when it fires the
/// most recent element is emitted and the rest of the period's elements are
/// dropped.
pub(crate) struct Throttle<T> {
    interval: Duration,
    timer: Timer,
    handle: Option<StageHandle<T>>,
    latest: Option<T>,
    armed: Option<TimerRegistration>,
}

impl<T> Throttle<T> {
    pub(crate) fn new(interval: Duration, timer: Timer) -> Self {
        Self {
            interval,
            timer,
            handle: None,
            latest: None,
            armed: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(registration) = self.armed.take() {
            registration.cancel();
        }
    }
}

impl<T: Send + 'static> Operator<T, T> for Throttle<T> {
    fn kind(&self) -> &'static str {
        "throttle"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Unbounded
    }

    fn buffered(&self) -> usize {
        usize::from(self.latest.is_some())
    }

    fn on_start(&mut self, handle: StageHandle<T>) {
        self.handle = Some(handle);
    }

    fn on_next(&mut self, value: T, _out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        self.latest = Some(value);
        if self.armed.is_none() {
            if let Some(handle) = self.handle.clone() {
                let registration = self
                    .timer
                    .schedule(self.interval, move || handle.fire(0))
                    .map_err(timer_failure)?;
                self.armed = Some(registration);
            }
        }
        Ok(())
    }

    fn on_timer(&mut self, _token: u64, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        self.armed = None;
        if let Some(latest) = self.latest.take() {
            out.emit(latest);
        }
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, T>) -> Completion {
        self.disarm();
        if let Some(latest) = self.latest.take() {
            out.emit(latest);
        }
        Completion::Now
    }

    fn on_error(&mut self, _error: &StreamError, _out: &mut Emitter<'_, T>) {
        self.disarm();
    }

    fn on_cancel(&mut self, _out: &mut Emitter<'_, T>) {
        self.disarm();
    }
}

/// Forwards elements until `duration` has elapsed since materialization,
/// then completes and cancels upstream.
pub(crate) struct Take {
    duration: Duration,
    timer: Timer,
    armed: Option<TimerRegistration>,
    failed: Option<StreamError>,
}

impl Take {
    pub(crate) fn new(duration: Duration, timer: Timer) -> Self {
        Self {
            duration,
            timer,
            armed: None,
            failed: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(registration) = self.armed.take() {
            registration.cancel();
        }
    }
}

impl<T: Send + 'static> Operator<T, T> for Take {
    fn kind(&self) -> &'static str {
        "take"
    }

    fn on_start(&mut self, handle: StageHandle<T>) {
        match self.timer.schedule(self.duration, move || handle.fire(0)) {
            Ok(registration) => self.armed = Some(registration),
            Err(error) => self.failed = Some(timer_failure(error)),
        }
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        if let Some(error) = self.failed.take() {
            return Err(error);
        }
        out.emit(value);
        Ok(())
    }

    fn on_timer(&mut self, _token: u64, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        self.armed = None;
        tracing::debug!(duration = ?self.duration, "take window elapsed");
        out.complete();
        Ok(())
    }

    fn on_complete(&mut self, _out: &mut Emitter<'_, T>) -> Completion {
        self.disarm();
        Completion::Now
    }

    fn on_error(&mut self, _error: &StreamError, _out: &mut Emitter<'_, T>) {
        self.disarm();
    }

    fn on_cancel(&mut self, _out: &mut Emitter<'_, T>) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use crate::broadcaster::Broadcaster;
    use crate::reactive::SignalKind;
    use crate::stream::test_support::collect;
    use crate::timer::Timer;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_throttle_keeps_latest_per_interval() {
        let timer = Timer::new("throttle").unwrap();
        let source = Broadcaster::<u32>::new();
        let (tx, rx) = mpsc::channel();
        let _control = source
            .stream()
            .throttle(Duration::from_millis(50), &timer)
            .consume(move |v| tx.send(v).unwrap());

        for i in 0..10 {
            source.on_next(i);
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 9);
        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());

        source.on_next(42);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_throttle_flushes_on_complete() {
        let timer = Timer::new("throttle-complete").unwrap();
        let out = collect(&crate::stream::Streams::range(0, 5).throttle(Duration::from_secs(60), &timer))
            .unwrap();
        assert_eq!(out, vec![4]);
    }

    #[test]
    fn test_take_completes_and_cancels_upstream() {
        let timer = Timer::new("take").unwrap();
        let source = Broadcaster::<u32>::new();
        let signals = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&signals);
        let (tx, rx) = mpsc::channel();
        let done = tx.clone();

        let control = source
            .stream()
            .finally_do(move |signal| s.lock().push(signal))
            .take(Duration::from_millis(50), &timer)
            .consume_with(
                move |v| tx.send(Some(v)).unwrap(),
                |_| {},
                move || done.send(None).unwrap(),
            );

        source.on_next(1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), None);
        assert!(control.wait_terminated(Duration::from_secs(1)));
        assert_eq!(*signals.lock(), vec![SignalKind::Cancel]);
        assert_eq!(source.subscriber_count(), 0);
    }
}
