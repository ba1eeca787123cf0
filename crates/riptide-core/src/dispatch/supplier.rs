//! Round-robin supplier over a fixed dispatcher set.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DispatchError, Dispatcher};

/// Hands out dispatchers from a bounded pool in round-robin order.
#[derive(Clone)]
pub struct DispatcherSupplier {
    name: Arc<str>,
    dispatchers: Arc<[Arc<dyn Dispatcher>]>,
    cursor: Arc<AtomicUsize>,
}

impl DispatcherSupplier {
    /// Creates a supplier over `dispatchers`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyPool`] if `dispatchers` is empty.
    pub fn new(
        name: impl Into<String>,
        dispatchers: Vec<Arc<dyn Dispatcher>>,
    ) -> Result<Self, DispatchError> {
        let name = name.into();
        if dispatchers.is_empty() {
            return Err(DispatchError::EmptyPool { name });
        }
        Ok(Self {
            name: Arc::from(name),
            dispatchers: dispatchers.into(),
            cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns true if both suppliers hand out the same pooled dispatchers.
    #[must_use]
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.dispatchers, &other.dispatchers)
    }

    /// Returns the next dispatcher in rotation.
    #[must_use]
    pub fn next(&self) -> Arc<dyn Dispatcher> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.dispatchers.len();
        Arc::clone(&self.dispatchers[index])
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    /// Always false; a supplier owns at least one dispatcher.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    /// All pooled dispatchers.
    #[must_use]
    pub fn dispatchers(&self) -> &[Arc<dyn Dispatcher>] {
        &self.dispatchers
    }

    /// Shuts every pooled dispatcher down.
    pub fn shutdown(&self) {
        for dispatcher in self.dispatchers.iter() {
            dispatcher.shutdown();
        }
    }
}

impl fmt::Debug for DispatcherSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherSupplier")
            .field("name", &self.name)
            .field("size", &self.dispatchers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SynchronousDispatcher;

    #[test]
    fn test_round_robin() {
        let supplier = DispatcherSupplier::new(
            "pool",
            (0..3)
                .map(|i| Arc::new(SynchronousDispatcher::new(format!("d{i}"))) as Arc<dyn Dispatcher>)
                .collect(),
        )
        .unwrap();
        let names: Vec<String> = (0..6).map(|_| supplier.next().name().to_string()).collect();
        assert_eq!(names, ["d0", "d1", "d2", "d0", "d1", "d2"]);
        assert_eq!(supplier.len(), 3);
    }

    #[test]
    fn test_clones_share_cursor() {
        let supplier = DispatcherSupplier::new(
            "pool",
            vec![
                Arc::new(SynchronousDispatcher::new("a")) as Arc<dyn Dispatcher>,
                Arc::new(SynchronousDispatcher::new("b")),
            ],
        )
        .unwrap();
        let other = supplier.clone();
        assert_eq!(supplier.next().name(), "a");
        assert_eq!(other.next().name(), "b");
    }

    #[test]
    fn test_shutdown_reaches_every_dispatcher() {
        let supplier = DispatcherSupplier::new(
            "pool",
            vec![
                Arc::new(SynchronousDispatcher::new("a")) as Arc<dyn Dispatcher>,
                Arc::new(SynchronousDispatcher::new("b")),
            ],
        )
        .unwrap();
        supplier.shutdown();
        assert!(supplier.dispatchers().iter().all(|d| !d.is_alive()));
    }

    #[test]
    fn test_empty_pool_rejected() {
        let err = DispatcherSupplier::new("empty", Vec::new()).unwrap_err();
        assert_eq!(
            err,
            DispatchError::EmptyPool {
                name: "empty".to_string()
            }
        );
    }

    #[test]
    fn test_same_pool_follows_clones() {
        let make = || {
            DispatcherSupplier::new(
                "pool",
                vec![Arc::new(SynchronousDispatcher::new("a")) as Arc<dyn Dispatcher>],
            )
            .unwrap()
        };
        let first = make();
        assert!(first.same_pool(&first.clone()));
        assert!(!first.same_pool(&make()));
    }
}
