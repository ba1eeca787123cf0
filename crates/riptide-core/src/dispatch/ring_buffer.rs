//! Bounded multi-producer single-consumer ring.
//!
//! ## Design
//!
//! - Power-of-two capacity, bitmask indexing
//! - One slot is kept free to tell "full" from "empty"
//! - Cache-padded head and tail
//! - Producers serialize through a spin lock with exponential backoff,
//!   after which the write path is the plain SPSC protocol
//! - The consumer never takes the lock

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::config::{MAX_RING_CAPACITY, MIN_RING_CAPACITY};
use super::CachePadded;

/// A fixed-capacity lock-free ring buffer.
///
/// Any number of threads may call [`push`](Self::push). Exactly one thread
/// may call [`pop`](Self::pop): the ring stays private to the dispatcher
/// whose consumer thread owns that side.
pub(crate) struct RingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to read. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot to write. Written only by the producer holding the lock.
    tail: CachePadded<AtomicUsize>,
    producer_lock: CachePadded<AtomicBool>,
    mask: usize,
}

// SAFETY: slots are only accessed through the head/tail protocol below, which
// hands each slot to exactly one thread at a time.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for RingBuffer<T> {}

// SAFETY: see above; producers are serialized by `producer_lock` and there is a
// single consumer.
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a ring holding at least `capacity - 1` items.
    ///
    /// The capacity is clamped to `[MIN_RING_CAPACITY, MAX_RING_CAPACITY]` and
    /// rounded up to the next power of two.
    #[must_use]
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity
            .clamp(MIN_RING_CAPACITY, MAX_RING_CAPACITY)
            .next_power_of_two();
        let slots: Vec<_> = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            producer_lock: CachePadded::new(AtomicBool::new(false)),
            mask: capacity - 1,
        }
    }

    /// Total slot count (one is always left free).
    #[inline]
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate number of queued items.
    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & self.mask
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }

    /// Enqueues an item, handing it back if the ring is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` when no slot is free.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        self.lock_producers();

        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;
        if next == self.head.load(Ordering::Acquire) {
            self.unlock_producers();
            return Err(item);
        }

        // SAFETY: the producer lock makes us the only writer, and the slot at
        // `tail` is outside [head, tail) so the consumer is not reading it.
        #[allow(unsafe_code)]
        unsafe {
            (*self.slots[tail].get()).write(item);
        }
        self.tail.store(next, Ordering::Release);

        self.unlock_producers();
        Ok(())
    }

    /// Dequeues the oldest item.
    ///
    /// Must only be called from the single consumer thread.
    #[must_use]
    pub(crate) fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the slot at `head` was published by the Release store of
        // `tail` observed above, and only the consumer advances `head`.
        #[allow(unsafe_code)]
        let item = unsafe { (*self.slots[head].get()).assume_init_read() };
        self.head.store((head + 1) & self.mask, Ordering::Release);
        Some(item)
    }

    /// Pops up to `max` items, passing each to `f`. Returns the count popped.
    pub(crate) fn pop_each<F>(&self, max: usize, mut f: F) -> usize
    where
        F: FnMut(T),
    {
        let mut popped = 0;
        while popped < max {
            let Some(item) = self.pop() else { break };
            f(item);
            popped += 1;
        }
        popped
    }

    fn lock_producers(&self) {
        let mut attempts = 0u32;
        while self
            .producer_lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            attempts = attempts.saturating_add(1);
            if attempts <= 4 {
                std::hint::spin_loop();
            } else if attempts <= 8 {
                thread::yield_now();
            } else {
                let micros = (1u64 << (attempts - 8).min(6)).min(100);
                thread::sleep(Duration::from_micros(micros));
            }
        }
    }

    fn unlock_producers(&self) {
        self.producer_lock.store(false, Ordering::Release);
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_capacity_rounds_up() {
        let ring: RingBuffer<u32> = RingBuffer::new(100);
        assert_eq!(ring.capacity(), 128);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_push_until_full() {
        let ring = RingBuffer::new(4);
        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert!(ring.push(3).is_ok());
        assert_eq!(ring.len(), ring.capacity() - 1);
        assert_eq!(ring.push(4), Err(4));

        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(4).is_ok());
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let ring = RingBuffer::new(4);
        for round in 0..10 {
            ring.push(round * 2).unwrap();
            ring.push(round * 2 + 1).unwrap();
            assert_eq!(ring.pop(), Some(round * 2));
            assert_eq!(ring.pop(), Some(round * 2 + 1));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_pop_each_respects_max() {
        let ring = RingBuffer::new(16);
        for i in 0..10 {
            ring.push(i).unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(ring.pop_each(4, |i| seen.push(i)), 4);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(ring.len(), 6);
    }

    #[test]
    fn test_drop_releases_queued_items() {
        let drops = Arc::new(AtomicUsize::new(0));

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let ring = RingBuffer::new(8);
            for _ in 0..5 {
                assert!(ring.push(Counted(Arc::clone(&drops))).is_ok());
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_multi_producer_single_consumer() {
        const PER_PRODUCER: usize = 10_000;
        let ring = Arc::new(RingBuffer::new(256));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut item = (p, i);
                        while let Err(back) = ring.push(item) {
                            item = back;
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut last = [None::<usize>; 4];
        let mut received = 0;
        while received < 4 * PER_PRODUCER {
            if let Some((p, i)) = ring.pop() {
                // Per-producer order is preserved.
                if let Some(prev) = last[p] {
                    assert!(i > prev);
                }
                last[p] = Some(i);
                received += 1;
            } else {
                thread::yield_now();
            }
        }

        for handle in producers {
            handle.join().unwrap();
        }
        assert!(ring.is_empty());
    }
}
