//! Transport boundary error types.

use thiserror::Error;

use crate::registry::ServerKind;

/// Errors from server construction and lifecycle.
#[derive(Debug, Error)]
pub enum NetError {
    /// No factory is registered for the server kind.
    #[error("no server factory registered for {0}")]
    UnknownKind(ServerKind),

    /// A factory is already registered for the server kind.
    #[error("server factory for {0} already registered")]
    DuplicateFactory(ServerKind),

    /// The server spec is incomplete or inconsistent.
    #[error("invalid server spec: {0}")]
    InvalidSpec(String),

    /// A codec failed to encode or decode a frame.
    #[error("codec '{codec}' failed: {reason}")]
    Codec {
        /// Codec name.
        codec: String,
        /// Failure description.
        reason: String,
    },

    /// The server is not in the expected lifecycle state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// The channel is closed.
    #[error("channel to {0} is closed")]
    ChannelClosed(std::net::SocketAddr),

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure from the stream engine.
    #[error("stream error: {0}")]
    Stream(#[from] riptide_core::StreamError),
}
