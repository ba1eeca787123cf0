//! Saturating demand counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand value meaning "no limit". Sticky once reached.
pub const UNBOUNDED: u64 = u64::MAX;

/// Outstanding demand for one subscription.
///
/// Producers call [`try_consume`](Self::try_consume) before delivering;
/// consumers call [`add`](Self::add) from `request(n)`.
#[derive(Debug, Default)]
pub struct Demand {
    pending: AtomicU64,
}

impl Demand {
    /// Creates a counter with no outstanding demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
        }
    }

    /// Adds `n` to the outstanding demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the demand before the addition.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return current;
            }
            let next = current.saturating_add(n);
            match self.pending.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consumes `n` units of demand if available.
    pub fn try_consume(&self, n: u64) -> bool {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current < n {
                return false;
            }
            match self.pending.compare_exchange_weak(
                current,
                current - n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current outstanding demand.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns true if demand is unbounded.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}

/// Adds two demand values, saturating at [`UNBOUNDED`].
#[must_use]
pub(crate) fn add_demand(current: u64, n: u64) -> u64 {
    current.saturating_add(n)
}

/// Subtracts delivered elements from demand, leaving [`UNBOUNDED`] untouched.
#[must_use]
pub(crate) fn sub_demand(current: u64, n: u64) -> u64 {
    if current == UNBOUNDED {
        current
    } else {
        current.saturating_sub(n)
    }
}
