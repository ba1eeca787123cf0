//! Cache-line alignment wrapper.

use std::fmt;
use std::ops::Deref;

/// Aligns a value to a 64-byte cache line.
///
/// Ring indices written by different threads live on separate lines so a
/// producer advancing the tail does not invalidate the consumer's head.
#[repr(C, align(64))]
#[derive(Default)]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_alignment() {
        assert_eq!(std::mem::align_of::<CachePadded<AtomicUsize>>(), 64);
        assert!(std::mem::size_of::<CachePadded<u8>>() >= 64);
    }

    #[test]
    fn test_deref() {
        let padded = CachePadded::new(AtomicUsize::new(3));
        padded.fetch_add(1, Ordering::Relaxed);
        assert_eq!(padded.load(Ordering::Relaxed), 4);
    }
}
