//! The generic stage host.
//!
//! Every operator runs inside an [`Action`]: a stage that is a subscriber to
//! its upstream and a subscription for its downstream. The action owns
//!
//! - a serialized drain loop (`wip` counter: one thread drains at a time,
//!   reentrant and concurrent signals only enqueue),
//! - demand accounting in both directions,
//! - the stage's error handlers, ignore flag and finally hooks,
//! - an optional dispatcher the drain loop is scheduled on.
//!
//! Operator callbacks run under the stage lock. Anything that may call back
//! into a pipeline (subscribing inner streams, feeding sub-streams, error
//! handlers, upstream `request`/`cancel`) is collected as an effect and run
//! after the lock is released. The downstream subscriber is only touched by
//! the thread owning the drain loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::options::{ErrorHandler, StageOptions};
use crate::dispatch::{Dispatcher, Task};
use crate::error::{ProtocolViolation, StreamError};
use crate::reactive::{add_demand, sub_demand, SignalKind, Subscriber, Subscription, UNBOUNDED};
use crate::snapshot::StageSnapshot;

/// Elements delivered downstream per lock acquisition.
const DELIVERY_BATCH: usize = 32;

/// How a stage turns downstream demand into upstream demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DemandPolicy {
    /// One upstream element per requested output.
    PassThrough,
    /// `k` upstream elements per requested output (count buffers).
    Multiply(u64),
    /// Request everything as soon as subscribed.
    Unbounded,
    /// Like `PassThrough`, but never more than `n` outstanding upstream.
    Capped(u64),
    /// The operator requests upstream itself through its [`StageHandle`].
    Manual,
}

/// Result of an operator's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Complete downstream once buffered output is delivered.
    Now,
    /// The operator completes later through [`Emitter::complete`].
    Deferred,
}

/// Signals from a stream an operator subscribed to on its own.
pub(crate) enum InnerEvent<O> {
    Subscribed(Arc<dyn Subscription>),
    Next(O),
    Error(StreamError),
    Complete,
}

/// Side effects collected under the stage lock.
#[derive(Default)]
pub(crate) struct Effects {
    tasks: Vec<Task>,
    handlers: Vec<(ErrorHandler, StreamError)>,
    cancel_upstream: bool,
    upstream_request: u64,
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.handlers.is_empty()
            && !self.cancel_upstream
            && self.upstream_request == 0
    }
}

/// Output side handed to operator callbacks.
pub(crate) struct Emitter<'a, O> {
    out: &'a mut VecDeque<O>,
    effects: &'a mut Effects,
    completed: bool,
}

impl<'a, O> Emitter<'a, O> {
    fn new(out: &'a mut VecDeque<O>, effects: &'a mut Effects) -> Self {
        Self {
            out,
            effects,
            completed: false,
        }
    }

    /// Queues an element for downstream delivery.
    pub(crate) fn emit(&mut self, value: O) {
        self.out.push_back(value);
    }

    /// Completes the stage. Upstream is cancelled if it is still running.
    pub(crate) fn complete(&mut self) {
        self.completed = true;
    }

    /// Runs `task` after the stage lock is released, in submission order.
    pub(crate) fn defer(&mut self, task: impl FnOnce() + Send + 'static) {
        self.effects.tasks.push(Box::new(task));
    }
}

/// Per-stage behaviour hosted by an [`Action`].
pub(crate) trait Operator<I, O>: Send + 'static {
    /// Stage kind reported in snapshots.
    fn kind(&self) -> &'static str;

    fn demand(&self) -> DemandPolicy {
        DemandPolicy::PassThrough
    }

    /// Upstream elements held by the operator that count towards the next
    /// output.
    fn buffered(&self) -> usize {
        0
    }

    /// Called once, before any signal, with a handle for asynchronous input.
    fn on_start(&mut self, handle: StageHandle<O>) {
        let _ = handle;
    }

    fn on_next(&mut self, value: I, out: &mut Emitter<'_, O>) -> Result<(), StreamError>;

    fn on_complete(&mut self, out: &mut Emitter<'_, O>) -> Completion {
        let _ = out;
        Completion::Now
    }

    /// The stage is terminating with `error`.
    fn on_error(&mut self, error: &StreamError, out: &mut Emitter<'_, O>) {
        let _ = (error, out);
    }

    fn on_timer(&mut self, token: u64, out: &mut Emitter<'_, O>) -> Result<(), StreamError> {
        let _ = (token, out);
        Ok(())
    }

    fn on_inner(
        &mut self,
        id: u64,
        event: InnerEvent<O>,
        out: &mut Emitter<'_, O>,
    ) -> Result<(), StreamError> {
        let _ = (id, event, out);
        Ok(())
    }

    /// Downstream granted `n` more demand.
    fn on_request(&mut self, n: u64, out: &mut Emitter<'_, O>) {
        let _ = (n, out);
    }

    /// The downstream cancelled.
    fn on_cancel(&mut self, out: &mut Emitter<'_, O>) {
        let _ = out;
    }
}

/// Asynchronous entry points into a running stage.
pub(crate) trait StageSink<O>: Send + Sync {
    fn fire(&self, token: u64);
    fn inner(&self, id: u64, event: InnerEvent<O>);
    fn request_upstream(&self, n: u64);
}

/// Weak handle used by timers and inner subscribers to reach their stage.
pub(crate) struct StageHandle<O> {
    sink: Weak<dyn StageSink<O>>,
}

impl<O> Clone for StageHandle<O> {
    fn clone(&self) -> Self {
        Self {
            sink: Weak::clone(&self.sink),
        }
    }
}

impl<O> StageHandle<O> {
    /// Delivers a timer firing; ignored once the stage is gone.
    pub(crate) fn fire(&self, token: u64) {
        if let Some(sink) = self.sink.upgrade() {
            sink.fire(token);
        }
    }

    pub(crate) fn inner(&self, id: u64, event: InnerEvent<O>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.inner(id, event);
        }
    }

    pub(crate) fn request_upstream(&self, n: u64) {
        if let Some(sink) = self.sink.upgrade() {
            sink.request_upstream(n);
        }
    }
}

enum Signal<I, O> {
    Next(I),
    Error(StreamError),
    Complete,
    /// A failure raised by the stage itself (protocol breach, dispatch error).
    Fault(StreamError),
    Timer(u64),
    Inner(u64, InnerEvent<O>),
}

enum Outcome {
    Continue,
    Failed(StreamError),
    UpstreamFailed(StreamError),
}

struct ActionState<I, O> {
    operator: Box<dyn Operator<I, O>>,
    inbox: VecDeque<Signal<I, O>>,
    outbox: VecDeque<O>,
    requested: u64,
    upstream: Option<Arc<dyn Subscription>>,
    /// Upstream kept for snapshots after `upstream` is released.
    lineage: Option<Arc<dyn Subscription>>,
    upstream_pending: u64,
    manual_backlog: u64,
    upstream_done: bool,
    terminal: Option<Result<(), StreamError>>,
    terminated: bool,
}

/// A stage hosting one operator.
pub(crate) struct Action<I, O> {
    this: Weak<Self>,
    kind: &'static str,
    options: StageOptions,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    policy: DemandPolicy,
    state: Mutex<ActionState<I, O>>,
    downstream: Mutex<Option<Box<dyn Subscriber<O>>>>,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    finalized: AtomicBool,
}

/// Upstream-facing half of an [`Action`].
pub(crate) struct ActionInlet<I: Send + 'static, O: Send + 'static> {
    action: Arc<Action<I, O>>,
}

impl<I: Send + 'static, O: Send + 'static> Action<I, O> {
    /// Materializes a stage in front of `downstream` and returns the
    /// subscriber to attach upstream.
    pub(crate) fn spawn(
        mut operator: Box<dyn Operator<I, O>>,
        options: StageOptions,
        dispatcher: Option<Arc<dyn Dispatcher>>,
        downstream: Box<dyn Subscriber<O>>,
    ) -> Box<dyn Subscriber<I>> {
        let kind = operator.kind();
        let policy = operator.demand();

        let action = Arc::new_cyclic(|this: &Weak<Self>| {
            let sink: Weak<dyn StageSink<O>> = this.clone();
            operator.on_start(StageHandle { sink });
            Self {
                this: this.clone(),
                kind,
                options,
                dispatcher,
                policy,
                state: Mutex::new(ActionState {
                    operator,
                    inbox: VecDeque::new(),
                    outbox: VecDeque::new(),
                    requested: 0,
                    upstream: None,
                    lineage: None,
                    upstream_pending: 0,
                    manual_backlog: 0,
                    upstream_done: false,
                    terminal: None,
                    terminated: false,
                }),
                downstream: Mutex::new(None),
                // Held by `attach` until the downstream is stored.
                wip: AtomicUsize::new(1),
                cancelled: AtomicBool::new(false),
                finalized: AtomicBool::new(false),
            }
        });

        tracing::trace!(stage = kind, "stage materialized");
        action.attach(downstream);
        Box::new(ActionInlet { action })
    }

    fn attach(&self, mut downstream: Box<dyn Subscriber<O>>) {
        if let Some(this) = self.this.upgrade() {
            downstream.on_subscribe(this);
        }
        *self.downstream.lock() = Some(downstream);
        self.resume();
    }

    fn schedule(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.resume();
        }
    }

    /// Runs the drain loop. The caller owns the `wip` counter.
    fn resume(&self) {
        match &self.dispatcher {
            Some(dispatcher) if !dispatcher.in_context() => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                if let Err(err) = dispatcher.dispatch(Box::new(move || this.drain())) {
                    tracing::warn!(stage = self.kind, error = %err, "dispatch failed, draining inline");
                    self.state.lock().inbox.push_back(Signal::Fault(err.into()));
                    self.drain();
                }
            }
            _ => self.drain(),
        }
    }

    fn drain(&self) {
        let mut missed = 1;
        loop {
            self.drain_once();
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }

    fn drain_once(&self) {
        loop {
            let mut fx = Effects::default();
            let (batch, terminal, upstream) = {
                let mut st = self.state.lock();
                if self.cancelled.load(Ordering::Acquire) {
                    st.inbox.clear();
                    st.outbox.clear();
                    drop(st);
                    self.downstream.lock().take();
                    return;
                }

                self.process_inbox(&mut st, &mut fx);

                let failing = matches!(st.terminal, Some(Err(_))) && !st.terminated;
                let mut batch: SmallVec<[O; DELIVERY_BATCH]> = SmallVec::new();
                if failing {
                    st.outbox.clear();
                } else {
                    while st.requested > 0 && batch.len() < DELIVERY_BATCH {
                        let Some(value) = st.outbox.pop_front() else {
                            break;
                        };
                        st.requested = sub_demand(st.requested, 1);
                        batch.push(value);
                    }
                }

                let terminal = if !st.terminated && st.outbox.is_empty() {
                    st.terminal.clone()
                } else {
                    None
                };
                if terminal.is_some() {
                    st.terminated = true;
                }

                fx.upstream_request = fx
                    .upstream_request
                    .saturating_add(self.replenish(&mut st));
                let upstream = if fx.cancel_upstream {
                    st.upstream.take()
                } else {
                    st.upstream.clone()
                };
                (batch, terminal, upstream)
            };

            let idle = batch.is_empty() && terminal.is_none() && fx.is_empty();
            self.apply(fx, upstream.as_ref());

            if !batch.is_empty() || terminal.is_some() {
                let mut guard = self.downstream.lock();
                if let Some(downstream) = guard.as_mut() {
                    for value in batch {
                        if self.cancelled.load(Ordering::Acquire) {
                            break;
                        }
                        downstream.on_next(value);
                    }
                    match &terminal {
                        Some(Ok(())) => downstream.on_complete(),
                        Some(Err(err)) => downstream.on_error(err.clone()),
                        None => {}
                    }
                }
                if terminal.is_some() {
                    guard.take();
                }
            }

            match terminal {
                Some(Ok(())) => self.finish(SignalKind::Complete),
                Some(Err(_)) => self.finish(SignalKind::Error),
                None => {}
            }

            if idle {
                return;
            }
        }
    }

    fn process_inbox(&self, st: &mut ActionState<I, O>, fx: &mut Effects) {
        while let Some(signal) = st.inbox.pop_front() {
            if st.terminal.is_some() {
                continue;
            }

            let ActionState {
                operator,
                outbox,
                upstream,
                upstream_done,
                ..
            } = &mut *st;
            let mut out = Emitter::new(outbox, fx);

            let outcome = match signal {
                Signal::Next(value) => into_outcome(operator.on_next(value, &mut out)),
                Signal::Timer(token) => into_outcome(operator.on_timer(token, &mut out)),
                Signal::Inner(id, event) => into_outcome(operator.on_inner(id, event, &mut out)),
                Signal::Fault(err) => Outcome::Failed(err),
                Signal::Complete => {
                    *upstream_done = true;
                    *upstream = None;
                    if operator.on_complete(&mut out) == Completion::Now {
                        out.complete();
                    }
                    Outcome::Continue
                }
                Signal::Error(err) => {
                    *upstream_done = true;
                    *upstream = None;
                    Outcome::UpstreamFailed(err)
                }
            };
            let completed = out.completed;

            match outcome {
                Outcome::Continue => {}
                Outcome::Failed(err) => {
                    if self.route_failure(&err, fx) {
                        tracing::debug!(stage = self.kind, error = %err, "stage failure ignored");
                    } else {
                        self.terminate(st, fx, err);
                        continue;
                    }
                }
                Outcome::UpstreamFailed(err) => {
                    if self.route_failure(&err, fx) {
                        tracing::debug!(stage = self.kind, error = %err, "upstream failure converted to completion");
                        let mut out = Emitter::new(&mut st.outbox, fx);
                        if st.operator.on_complete(&mut out) == Completion::Now {
                            out.complete();
                        }
                        if out.completed {
                            self.complete(st, fx);
                        }
                    } else {
                        self.terminate(st, fx, err);
                    }
                    continue;
                }
            }

            if completed {
                self.complete(st, fx);
            }
        }
    }

    /// Runs the matching handler. Returns true if the failure is swallowed.
    fn route_failure(&self, err: &StreamError, fx: &mut Effects) -> bool {
        if let Some(handler) = self.options.handler_for(err) {
            fx.handlers.push((handler, err.clone()));
        } else if !self.options.ignores_errors() {
            tracing::debug!(stage = self.kind, error = %err, "unhandled stage failure");
        }
        self.options.ignores_errors()
    }

    fn complete(&self, st: &mut ActionState<I, O>, fx: &mut Effects) {
        if st.terminal.is_some() {
            return;
        }
        st.terminal = Some(Ok(()));
        if !st.upstream_done {
            fx.cancel_upstream = true;
        }
    }

    fn terminate(&self, st: &mut ActionState<I, O>, fx: &mut Effects, err: StreamError) {
        let mut out = Emitter::new(&mut st.outbox, fx);
        st.operator.on_error(&err, &mut out);
        st.terminal = Some(Err(err));
        st.inbox.clear();
        if !st.upstream_done {
            fx.cancel_upstream = true;
        }
    }

    /// Computes how much to request upstream now.
    fn replenish(&self, st: &mut ActionState<I, O>) -> u64 {
        if st.upstream.is_none()
            || st.upstream_done
            || st.terminal.is_some()
            || self.cancelled.load(Ordering::Acquire)
        {
            return 0;
        }

        let (per_output, cap) = match self.policy {
            DemandPolicy::Manual => {
                let backlog = std::mem::take(&mut st.manual_backlog);
                st.upstream_pending = add_demand(st.upstream_pending, backlog);
                return backlog;
            }
            DemandPolicy::Unbounded => return request_unbounded(st),
            DemandPolicy::PassThrough => (1, None),
            DemandPolicy::Multiply(k) => (k.max(1), None),
            DemandPolicy::Capped(n) => (1, Some(n.max(1))),
        };

        if st.requested == UNBOUNDED && cap.is_none() {
            return request_unbounded(st);
        }

        let queued = st.outbox.len() as u64;
        let held = (st.inbox.len() + st.operator.buffered()) as u64;
        let mut target = st
            .requested
            .saturating_sub(queued)
            .saturating_mul(per_output)
            .saturating_sub(held);
        if let Some(cap) = cap {
            target = target.min(cap);
        }

        if st.upstream_pending == UNBOUNDED || target <= st.upstream_pending {
            return 0;
        }
        let n = target - st.upstream_pending;
        st.upstream_pending = target;
        n
    }

    fn apply(&self, fx: Effects, upstream: Option<&Arc<dyn Subscription>>) {
        let Effects {
            tasks,
            handlers,
            cancel_upstream,
            upstream_request,
        } = fx;

        for (handler, err) in handlers {
            handler(&err);
        }
        if let Some(upstream) = upstream {
            if cancel_upstream {
                upstream.cancel();
            } else if upstream_request > 0 {
                upstream.request(upstream_request);
            }
        }
        for task in tasks {
            task();
        }
    }

    /// Runs the finally hooks exactly once.
    fn finish(&self, signal: SignalKind) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        for hook in self.options.finally_hooks() {
            hook(signal);
        }
    }

    fn push(&self, signal: Signal<I, O>) {
        self.state.lock().inbox.push_back(signal);
        self.schedule();
    }

    fn on_upstream_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let request = {
            let mut st = self.state.lock();
            if self.cancelled.load(Ordering::Acquire) || st.terminal.is_some() {
                None
            } else if st.upstream.is_some() || st.upstream_done {
                tracing::error!(
                    error = %ProtocolViolation::DoubleSubscribe { stage: self.kind.to_string() },
                    "protocol violation"
                );
                None
            } else {
                st.upstream = Some(Arc::clone(&subscription));
                st.lineage = Some(Arc::clone(&subscription));
                Some(self.replenish(&mut st))
            }
        };

        match request {
            None => subscription.cancel(),
            Some(0) => {}
            Some(n) => subscription.request(n),
        }
    }

    fn on_upstream_next(&self, value: I) {
        {
            let mut st = self.state.lock();
            if self.cancelled.load(Ordering::Acquire) || st.terminal.is_some() {
                return;
            }
            if st.upstream_done {
                tracing::error!(
                    error = %ProtocolViolation::SignalAfterTerminal {
                        stage: self.kind.to_string(),
                        signal: SignalKind::Next,
                    },
                    "protocol violation"
                );
                return;
            }
            if st.upstream_pending == 0 {
                let violation = ProtocolViolation::DemandExceeded {
                    stage: self.kind.to_string(),
                };
                tracing::error!(error = %violation, "protocol violation");
                st.inbox.push_back(Signal::Fault(violation.into()));
            } else {
                st.upstream_pending = sub_demand(st.upstream_pending, 1);
                st.inbox.push_back(Signal::Next(value));
            }
        }
        self.schedule();
    }

    fn on_upstream_terminal(&self, signal: Signal<I, O>, kind: SignalKind) {
        {
            let mut st = self.state.lock();
            if st.upstream_done {
                tracing::error!(
                    error = %ProtocolViolation::SignalAfterTerminal {
                        stage: self.kind.to_string(),
                        signal: kind,
                    },
                    "protocol violation"
                );
                return;
            }
            st.upstream_done = true;
            st.inbox.push_back(signal);
        }
        self.schedule();
    }
}

fn into_outcome(result: Result<(), StreamError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Continue,
        Err(err) => Outcome::Failed(err),
    }
}

fn request_unbounded<I, O>(st: &mut ActionState<I, O>) -> u64 {
    if st.upstream_pending == UNBOUNDED {
        0
    } else {
        st.upstream_pending = UNBOUNDED;
        UNBOUNDED
    }
}

impl<I: Send + 'static, O: Send + 'static> Subscription for Action<I, O> {
    fn request(&self, n: u64) {
        if n == 0 {
            let violation = ProtocolViolation::NonPositiveRequest {
                stage: self.kind.to_string(),
            };
            tracing::error!(error = %violation, "protocol violation");
            self.push(Signal::Fault(violation.into()));
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }

        let mut fx = Effects::default();
        let upstream = {
            let mut st = self.state.lock();
            if st.terminated {
                return;
            }
            st.requested = add_demand(st.requested, n);
            {
                let ActionState {
                    operator, outbox, ..
                } = &mut *st;
                let mut out = Emitter::new(outbox, &mut fx);
                operator.on_request(n, &mut out);
            }
            fx.upstream_request = self.replenish(&mut st);
            st.upstream.clone()
        };
        self.apply(fx, upstream.as_ref());
        self.schedule();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut fx = Effects::default();
        let (upstream, was_terminated) = {
            let mut st = self.state.lock();
            {
                let ActionState {
                    operator, outbox, ..
                } = &mut *st;
                let mut out = Emitter::new(outbox, &mut fx);
                operator.on_cancel(&mut out);
            }
            st.inbox.clear();
            let upstream = st.upstream.take();
            fx.cancel_upstream = !st.upstream_done;
            (upstream, st.terminated)
        };

        tracing::trace!(stage = self.kind, "stage cancelled");
        self.apply(fx, upstream.as_ref());
        if !was_terminated {
            self.finish(SignalKind::Cancel);
        }
        self.schedule();
    }

    fn describe(&self, out: &mut Vec<StageSnapshot>) {
        let upstream = {
            let st = self.state.lock();
            out.push(StageSnapshot {
                kind: self.kind,
                name: self.options.name().map(str::to_string),
                pending_demand: st.requested,
                upstream_demand: st.upstream_pending,
                buffered: st.outbox.len() + st.inbox.len() + st.operator.buffered(),
                cancelled: self.cancelled.load(Ordering::Acquire),
                terminated: st.terminated,
                dispatcher: self.dispatcher.as_ref().map(|d| d.name().to_string()),
            });
            st.lineage.clone()
        };
        if let Some(upstream) = upstream {
            upstream.describe(out);
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> StageSink<O> for Action<I, O> {
    fn fire(&self, token: u64) {
        self.push(Signal::Timer(token));
    }

    fn inner(&self, id: u64, event: InnerEvent<O>) {
        self.push(Signal::Inner(id, event));
    }

    fn request_upstream(&self, n: u64) {
        if n == 0 {
            return;
        }
        let upstream = {
            let mut st = self.state.lock();
            if st.upstream_done || st.terminal.is_some() || self.cancelled.load(Ordering::Acquire) {
                return;
            }
            match &st.upstream {
                Some(upstream) => {
                    let upstream = Arc::clone(upstream);
                    st.upstream_pending = add_demand(st.upstream_pending, n);
                    upstream
                }
                None => {
                    st.manual_backlog = add_demand(st.manual_backlog, n);
                    return;
                }
            }
        };
        upstream.request(n);
    }
}

impl<I: Send + 'static, O: Send + 'static> Subscriber<I> for ActionInlet<I, O> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.action.on_upstream_subscribe(subscription);
    }

    fn on_next(&mut self, value: I) {
        self.action.on_upstream_next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.action
            .on_upstream_terminal(Signal::Error(error), SignalKind::Error);
    }

    fn on_complete(&mut self) {
        self.action
            .on_upstream_terminal(Signal::Complete, SignalKind::Complete);
    }
}

/// Operator that forwards elements unchanged.
///
/// Hosts decorations on sources and marks `dispatch_on` and `capacity`
/// boundaries.
pub(crate) struct Identity {
    kind: &'static str,
    demand: DemandPolicy,
}

impl Identity {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            demand: DemandPolicy::PassThrough,
        }
    }

    pub(crate) fn capped(n: u64) -> Self {
        Self {
            kind: "capacity",
            demand: DemandPolicy::Capped(n),
        }
    }
}

impl<T: Send + 'static> Operator<T, T> for Identity {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn demand(&self) -> DemandPolicy {
        self.demand
    }

    fn on_next(&mut self, value: T, out: &mut Emitter<'_, T>) -> Result<(), StreamError> {
        out.emit(value);
        Ok(())
    }
}
