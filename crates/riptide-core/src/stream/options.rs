//! Per-stage decorations: error handlers, ignore flag, finally hooks, name.

use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorMatcher, StreamError};
use crate::reactive::SignalKind;

/// Callback invoked with a matching failure.
pub(crate) type ErrorHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Callback invoked once with the terminal signal.
pub(crate) type FinallyHook = Arc<dyn Fn(SignalKind) + Send + Sync>;

/// Decorations attached to one stage.
///
/// Copy-on-write: `Stream::when` and friends clone the options of the stage
/// they decorate, so sharing a `Stream` value never leaks handlers between
/// independently built chains.
#[derive(Clone, Default)]
pub(crate) struct StageOptions {
    handlers: Vec<(ErrorMatcher, ErrorHandler)>,
    ignore_errors: bool,
    finally: Vec<FinallyHook>,
    name: Option<Arc<str>>,
}

impl StageOptions {
    /// True when no behaviour is attached and a source can be wired directly.
    pub(crate) fn is_plain(&self) -> bool {
        self.handlers.is_empty() && !self.ignore_errors && self.finally.is_empty()
    }

    pub(crate) fn with_handler(&self, matcher: ErrorMatcher, handler: ErrorHandler) -> Self {
        let mut next = self.clone();
        next.handlers.push((matcher, handler));
        next
    }

    pub(crate) fn with_ignore_errors(&self) -> Self {
        let mut next = self.clone();
        next.ignore_errors = true;
        next
    }

    pub(crate) fn with_finally(&self, hook: FinallyHook) -> Self {
        let mut next = self.clone();
        next.finally.push(hook);
        next
    }

    pub(crate) fn with_name(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.name = Some(Arc::from(name));
        next
    }

    /// First registered handler whose matcher selects `error`.
    pub(crate) fn handler_for(&self, error: &StreamError) -> Option<ErrorHandler> {
        self.handlers
            .iter()
            .find(|(matcher, _)| matcher.matches(error))
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub(crate) fn ignores_errors(&self) -> bool {
        self.ignore_errors
    }

    pub(crate) fn finally_hooks(&self) -> &[FinallyHook] {
        &self.finally
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for StageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOptions")
            .field("handlers", &self.handlers.len())
            .field("ignore_errors", &self.ignore_errors)
            .field("finally", &self.finally.len())
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_matching_handler_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&hits);
        let second = Arc::clone(&hits);

        let options = StageOptions::default()
            .with_handler(
                ErrorMatcher::Kind(FailureKind::Parse),
                Arc::new(move |_| {
                    first.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .with_handler(
                ErrorMatcher::Any,
                Arc::new(move |_| {
                    second.fetch_add(10, Ordering::SeqCst);
                }),
            );

        let parse = StreamError::new(FailureKind::Parse, "bad digit");
        options.handler_for(&parse).unwrap()(&parse);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let other = StreamError::illegal_state("closed");
        options.handler_for(&other).unwrap()(&other);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_copy_on_write() {
        let base = StageOptions::default();
        let decorated = base.with_ignore_errors().with_name("parse");
        assert!(base.is_plain());
        assert!(!decorated.is_plain());
        assert_eq!(decorated.name(), Some("parse"));
        assert!(base.handler_for(&StreamError::illegal_state("x")).is_none());
    }
}
