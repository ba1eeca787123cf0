//! Join gate over externally invoked callbacks.
//!
//! A [`BarrierStream`] hands out wrapped callbacks, one slot each. Invoking
//! a wrapped callback runs the original immediately and records an arrival
//! for its slot. Once every slot holds an arrival, the barrier emits one
//! round: the slot values in registration order.
//!
//! ```text
//!   slot 0: a0 a1        ┐
//!   slot 1: b0           ├──▶ [a0, b0, c0]   (a1 waits for the next round)
//!   slot 2: c0           ┘
//! ```
//!
//! Arrivals beyond the current round stay queued per slot; nothing is
//! dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::stream::{Stream, UnicastProcessor};

struct Rounds<V> {
    slots: Vec<VecDeque<V>>,
    emitted: u64,
    closed: bool,
}

impl<V> Rounds<V> {
    fn take_ready(&mut self) -> Option<Vec<V>> {
        if self.slots.is_empty() || self.slots.iter().any(VecDeque::is_empty) {
            return None;
        }
        let round: Vec<V> = self.slots.iter_mut().filter_map(VecDeque::pop_front).collect();
        self.emitted += 1;
        Some(round)
    }
}

struct Gate<V> {
    rounds: Mutex<Rounds<V>>,
    output: Arc<UnicastProcessor<Vec<V>>>,
}

impl<V: Send + 'static> Gate<V> {
    fn arrive(&self, slot: usize, value: V) {
        {
            let mut rounds = self.rounds.lock();
            if rounds.closed {
                tracing::debug!(slot, "arrival after barrier completion ignored");
                return;
            }
            rounds.slots[slot].push_back(value);
            while let Some(round) = rounds.take_ready() {
                self.output.push(round);
            }
        }
        self.output.drain();
    }

    fn register(&self) -> usize {
        let mut rounds = self.rounds.lock();
        rounds.slots.push(VecDeque::new());
        rounds.slots.len() - 1
    }
}

/// Emits one `Vec<V>` per complete round of wrapped-callback arrivals.
pub struct BarrierStream<V> {
    gate: Arc<Gate<V>>,
}

impl<V> Clone for BarrierStream<V> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<V: Send + 'static> Default for BarrierStream<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + 'static> BarrierStream<V> {
    /// Creates a barrier with no slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Gate {
                rounds: Mutex::new(Rounds {
                    slots: Vec::new(),
                    emitted: 0,
                    closed: false,
                }),
                output: UnicastProcessor::new("barrier"),
            }),
        }
    }

    /// Registers a slot whose arrival value is the callback's argument.
    pub fn wrap<A, F>(&self, mut callback: F) -> impl FnMut(A) + Send
    where
        A: Clone + Into<V>,
        F: FnMut(A) + Send + 'static,
    {
        let slot = self.gate.register();
        let gate = Arc::clone(&self.gate);
        move |arg: A| {
            let recorded = arg.clone().into();
            callback(arg);
            gate.arrive(slot, recorded);
        }
    }

    /// Registers a slot whose arrival value is the callback's return value.
    pub fn wrap_fn<A, R, F>(&self, mut callback: F) -> impl FnMut(A) -> R + Send
    where
        R: Clone + Into<V>,
        F: FnMut(A) -> R + Send + 'static,
    {
        let slot = self.gate.register();
        let gate = Arc::clone(&self.gate);
        move |arg: A| {
            let result = callback(arg);
            gate.arrive(slot, result.clone().into());
            result
        }
    }

    /// The stream of rounds. It accepts a single subscriber; rounds completed
    /// before it subscribes are queued.
    #[must_use]
    pub fn stream(&self) -> Stream<Vec<V>> {
        Stream::from_processor(&self.gate.output)
    }

    /// Completes the round stream. Partial rounds are discarded.
    pub fn complete(&self) {
        let partial = {
            let mut rounds = self.gate.rounds.lock();
            rounds.closed = true;
            rounds.slots.iter().map(VecDeque::len).sum::<usize>()
        };
        if partial > 0 {
            tracing::debug!(partial, "barrier completed with a partial round");
        }
        self.gate.output.complete();
    }

    /// Number of registered slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.gate.rounds.lock().slots.len()
    }

    /// Number of rounds emitted so far.
    #[must_use]
    pub fn rounds_emitted(&self) -> u64 {
        self.gate.rounds.lock().emitted
    }
}

impl<V> fmt::Debug for BarrierStream<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounds = self.gate.rounds.lock();
        f.debug_struct("BarrierStream")
            .field("slots", &rounds.slots.len())
            .field("emitted", &rounds.emitted)
            .field("closed", &rounds.closed)
            .finish()
    }
}
