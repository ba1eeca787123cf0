//! Stream failure types.
//!
//! Every failure that travels through a pipeline is a [`StreamError`]. It
//! carries a closed [`FailureKind`] so that error handlers can be selected
//! without runtime type inspection, a human readable message and an optional
//! underlying cause.
//!
//! Handlers are registered against an [`ErrorMatcher`]. A stage keeps its
//! handlers in registration order and invokes the first one that matches.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::reactive::SignalKind;

/// Closed classification of stream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Input could not be parsed.
    Parse,
    /// A caller supplied an argument outside the accepted domain.
    IllegalArgument,
    /// An operation was attempted in a state that does not allow it.
    IllegalState,
    /// A bounded wait elapsed.
    Timeout,
    /// The work was cancelled before it finished.
    Cancelled,
    /// A Reactive Streams protocol rule was broken.
    Protocol,
    /// An I/O collaborator failed.
    Io,
    /// A value was required but the source completed empty.
    Empty,
    /// A dispatcher refused a task.
    Dispatch,
    /// Application defined failure, identified by a static label.
    Custom(&'static str),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::IllegalArgument => write!(f, "illegal argument"),
            Self::IllegalState => write!(f, "illegal state"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Protocol => write!(f, "protocol violation"),
            Self::Io => write!(f, "io"),
            Self::Empty => write!(f, "empty"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Custom(label) => write!(f, "{label}"),
        }
    }
}

/// A failure signalled through a pipeline.
///
/// Cheap to clone: the optional cause is reference counted so the same error
/// can be handed to handlers, `finally` hooks and the downstream subscriber.
#[derive(Clone)]
pub struct StreamError {
    kind: FailureKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl StreamError {
    /// Creates a new error of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error that wraps an underlying cause.
    pub fn with_source<E>(kind: FailureKind, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Shorthand for [`FailureKind::IllegalArgument`].
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(FailureKind::IllegalArgument, message)
    }

    /// Shorthand for [`FailureKind::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(FailureKind::IllegalState, message)
    }

    /// Shorthand for [`FailureKind::Custom`].
    pub fn custom(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Custom(label), message)
    }

    /// Returns the failure classification.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::num::ParseIntError> for StreamError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::with_source(FailureKind::Parse, err.to_string(), err)
    }
}

impl From<std::num::ParseFloatError> for StreamError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::with_source(FailureKind::Parse, err.to_string(), err)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(FailureKind::Io, err.to_string(), err)
    }
}

impl From<ProtocolViolation> for StreamError {
    fn from(err: ProtocolViolation) -> Self {
        Self::with_source(FailureKind::Protocol, err.to_string(), err)
    }
}

impl From<crate::dispatch::DispatchError> for StreamError {
    fn from(err: crate::dispatch::DispatchError) -> Self {
        let kind = match err {
            crate::dispatch::DispatchError::Timeout { .. } => FailureKind::Timeout,
            crate::dispatch::DispatchError::ShutDown { .. }
            | crate::dispatch::DispatchError::SpawnFailed { .. } => FailureKind::Dispatch,
            crate::dispatch::DispatchError::UnknownKind(_)
            | crate::dispatch::DispatchError::EmptyPool { .. } => FailureKind::IllegalArgument,
        };
        Self::with_source(kind, err.to_string(), err)
    }
}

/// Breaches of the subscription protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// `on_subscribe` was delivered twice to the same subscriber.
    #[error("subscriber of stage '{stage}' received a second subscription")]
    DoubleSubscribe {
        /// Stage that observed the violation.
        stage: String,
    },

    /// More elements were delivered than were requested.
    #[error("stage '{stage}' received an element without outstanding demand")]
    DemandExceeded {
        /// Stage that observed the violation.
        stage: String,
    },

    /// `request(0)` was called.
    #[error("request(n) requires n > 0, stage '{stage}' received 0")]
    NonPositiveRequest {
        /// Stage that observed the violation.
        stage: String,
    },

    /// A signal arrived after the terminal signal.
    #[error("stage '{stage}' received {signal:?} after its terminal signal")]
    SignalAfterTerminal {
        /// Stage that observed the violation.
        stage: String,
        /// The late signal.
        signal: SignalKind,
    },
}

/// Selects which failures an error handler reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMatcher {
    /// Matches every failure.
    Any,
    /// Matches failures of exactly this kind.
    Kind(FailureKind),
}

impl ErrorMatcher {
    /// Returns true if the matcher selects this error.
    #[must_use]
    pub fn matches(&self, error: &StreamError) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(kind) => error.kind() == *kind,
        }
    }
}

impl From<FailureKind> for ErrorMatcher {
    fn from(kind: FailureKind) -> Self {
        Self::Kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = StreamError::illegal_argument("value 5 is too large");
        assert_eq!(err.to_string(), "illegal argument: value 5 is too large");
        assert_eq!(err.kind(), FailureKind::IllegalArgument);
    }

    #[test]
    fn test_parse_error_keeps_source() {
        let err: StreamError = "x".parse::<i32>().unwrap_err().into();
        assert_eq!(err.kind(), FailureKind::Parse);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_matcher_selects_by_kind() {
        let err = StreamError::custom("quota", "over quota");
        assert!(ErrorMatcher::Any.matches(&err));
        assert!(ErrorMatcher::from(FailureKind::Custom("quota")).matches(&err));
        assert!(!ErrorMatcher::Kind(FailureKind::Parse).matches(&err));
    }

    #[test]
    fn test_protocol_violation_converts() {
        let err: StreamError = ProtocolViolation::NonPositiveRequest {
            stage: "map".into(),
        }
        .into();
        assert_eq!(err.kind(), FailureKind::Protocol);
        assert!(err.message().contains("n > 0"));
    }
}
