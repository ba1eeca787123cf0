//! Count and time based batching.

use std::sync::Arc;
use std::time::Duration;

use super::action::{Completion, DemandPolicy, Emitter, Operator, StageHandle};
use super::{Stream, UnicastProcessor};
use crate::error::StreamError;
use crate::timer::{Timer, TimerRegistration};

/// Emits a `Vec` every `size` elements; flushes the remainder on completion.
pub(crate) struct Buffer<T> {
    size: usize,
    batch: Vec<T>,
}

impl<T> Buffer<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            batch: Vec::with_capacity(size),
        }
    }
}

impl<T: Send + 'static> Operator<T, Vec<T>> for Buffer<T> {
    fn kind(&self) -> &'static str {
        "buffer"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Multiply(self.size as u64)
    }

    fn buffered(&self) -> usize {
        self.batch.len()
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, Vec<T>>) -> Result<(), StreamError> {
        self.batch.push(value);
        if self.batch.len() >= self.size {
            out.emit(std::mem::replace(
                &mut self.batch,
                Vec::with_capacity(self.size),
            ));
        }
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, Vec<T>>) -> Completion {
        if !self.batch.is_empty() {
            out.emit(std::mem::take(&mut self.batch));
        }
        Completion::Now
    }
}

/// [`Buffer`] that also flushes a partial batch `timeout` after the batch's
/// first element.
///
/// Each batch has a generation number. The timer carries the generation it
/// was armed for, and a firing for an older generation is ignored, so a
/// size flush and a timer flush never both emit the same batch.
pub(crate) struct BufferTimeout<T> {
    size: usize,
    timeout: Duration,
    timer: Timer,
    handle: Option<StageHandle<Vec<T>>>,
    batch: Vec<T>,
    generation: u64,
    armed: Option<TimerRegistration>,
}

impl<T> BufferTimeout<T> {
    pub(crate) fn new(size: usize, timeout: Duration, timer: Timer) -> Self {
        Self {
            size,
            timeout,
            timer,
            handle: None,
            batch: Vec::with_capacity(size),
            generation: 0,
            armed: None,
        }
    }

    fn flush(&mut self, out: &mut Emitter<'_, Vec<T>>) {
        if let Some(registration) = self.armed.take() {
            registration.cancel();
        }
        self.generation += 1;
        if !self.batch.is_empty() {
            out.emit(std::mem::replace(
                &mut self.batch,
                Vec::with_capacity(self.size),
            ));
        }
    }
}

impl<T: Send + 'static> Operator<T, Vec<T>> for BufferTimeout<T> {
    fn kind(&self) -> &'static str {
        "buffer_timeout"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Multiply(self.size as u64)
    }

    fn buffered(&self) -> usize {
        self.batch.len()
    }

    fn on_start(&mut self, handle: StageHandle<Vec<T>>) {
        self.handle = Some(handle);
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, Vec<T>>) -> Result<(), StreamError> {
        self.batch.push(value);
        if self.batch.len() >= self.size {
            self.flush(out);
            return Ok(());
        }

        if self.batch.len() == 1 {
            if let Some(handle) = self.handle.clone() {
                let generation = self.generation;
                let registration = self
                    .timer
                    .schedule(self.timeout, move || handle.fire(generation))
                    .map_err(|e| {
                        StreamError::with_source(
                            crate::error::FailureKind::IllegalState,
                            "buffer timer unavailable",
                            e,
                        )
                    })?;
                self.armed = Some(registration);
            }
        }
        Ok(())
    }

    fn on_timer(&mut self, token: u64, out: &mut Emitter<'_, Vec<T>>) -> Result<(), StreamError> {
        if token == self.generation {
            self.armed = None;
            self.flush(out);
        }
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, Vec<T>>) -> Completion {
        self.flush(out);
        Completion::Now
    }

    fn on_error(&mut self, _error: &StreamError, _out: &mut Emitter<'_, Vec<T>>) {
        if let Some(registration) = self.armed.take() {
            registration.cancel();
        }
    }

    fn on_cancel(&mut self, _out: &mut Emitter<'_, Vec<T>>) {
        if let Some(registration) = self.armed.take() {
            registration.cancel();
        }
    }
}

/// Emits a new sub-stream every `size` elements.
pub(crate) struct Window<T> {
    size: usize,
    current: Option<(Arc<UnicastProcessor<T>>, usize)>,
}

impl<T> Window<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            current: None,
        }
    }
}

impl<T: Send + 'static> Operator<T, Stream<T>> for Window<T> {
    fn kind(&self) -> &'static str {
        "window"
    }

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::Multiply(self.size as u64)
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, Stream<T>>) -> Result<(), StreamError> {
        let (window, filled) = self.current.get_or_insert_with(|| {
            let window = UnicastProcessor::new("window");
            out.emit(Stream::from_processor(&window));
            (window, 0)
        });
        *filled += 1;

        let target = Arc::clone(window);
        let last = *filled >= self.size;
        out.defer(move || {
            target.emit(value);
            if last {
                target.complete();
            }
        });
        if last {
            self.current = None;
        }
        Ok(())
    }

    fn on_complete(&mut self, out: &mut Emitter<'_, Stream<T>>) -> Completion {
        if let Some((window, _)) = self.current.take() {
            out.defer(move || window.complete());
        }
        Completion::Now
    }

    fn on_error(&mut self, error: &StreamError, out: &mut Emitter<'_, Stream<T>>) {
        if let Some((window, _)) = self.current.take() {
            let error = error.clone();
            out.defer(move || window.fail(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::stream::test_support::{collect, recorder};
    use crate::stream::Streams;
    use crate::timer::Timer;
    use std::time::Duration;

    #[test]
    fn test_buffer_batches() {
        let batches = collect(&Streams::range(0, 10).buffer(4)).unwrap();
        assert_eq!(
            batches,
            vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]
        );
    }

    #[test]
    fn test_buffer_exact_multiple() {
        let batches = collect(&Streams::range(0, 9).buffer(3)).unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn test_buffer_requests_size_per_batch() {
        let (p, handle) = recorder(1);
        Streams::range(0, 100).buffer(5).subscribe(Box::new(p));
        assert_eq!(handle.values(), vec![vec![0, 1, 2, 3, 4]]);
        handle.request(1);
        assert_eq!(handle.values().len(), 2);
    }

    #[test]
    fn test_zero_size_fails() {
        assert!(collect(&Streams::range(0, 3).buffer(0)).is_err());
        assert!(collect(&Streams::range(0, 3).window(0)).is_err());
    }

    #[test]
    fn test_buffer_timeout_flushes_partial_batch() {
        let timer = Timer::new("buffer-timeout").unwrap();
        let source = crate::broadcaster::Broadcaster::<u32>::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let _control = source
            .stream()
            .buffer_timeout(10, Duration::from_millis(50), &timer)
            .consume(move |batch| tx.send(batch).unwrap());

        source.on_next(1);
        source.on_next(2);
        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(batch, vec![1, 2]);

        for i in 0..10 {
            source.on_next(i);
        }
        let full = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(full, (0..10).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn test_windows() {
        let windows = collect(&Streams::range(0, 7).window(3)).unwrap();
        assert_eq!(windows.len(), 3);
        let contents: Vec<Vec<i64>> = windows.iter().map(|w| collect(w).unwrap()).collect();
        assert_eq!(contents, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }
}
