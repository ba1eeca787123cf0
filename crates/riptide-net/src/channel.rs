//! One accepted connection as seen by channel consumers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use riptide_core::Stream;

use crate::error::NetError;

/// Outbound half of a channel: encodes and writes one value.
pub type OutboundSink<Out> = Arc<dyn Fn(Out) -> Result<(), NetError> + Send + Sync>;

/// Callback run once per accepted channel.
pub type ChannelConsumer<In, Out> = Arc<dyn Fn(&Channel<In, Out>) + Send + Sync>;

/// A connection: decoded inbound values as a stream, plus an outbound sink.
pub struct Channel<In, Out> {
    id: u64,
    remote: SocketAddr,
    inbound: Stream<In>,
    outbound: OutboundSink<Out>,
}

impl<In, Out> Clone for Channel<In, Out> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            remote: self.remote,
            inbound: self.inbound.clone(),
            outbound: Arc::clone(&self.outbound),
        }
    }
}

impl<In: Send + 'static, Out> Channel<In, Out> {
    /// Creates a channel. Called by server implementations on accept.
    #[must_use]
    pub fn new(id: u64, remote: SocketAddr, inbound: Stream<In>, outbound: OutboundSink<Out>) -> Self {
        Self {
            id,
            remote,
            inbound,
            outbound,
        }
    }

    /// Server-unique channel id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Decoded inbound values. Completes when the peer disconnects.
    #[must_use]
    pub fn inbound(&self) -> &Stream<In> {
        &self.inbound
    }

    /// Encodes and writes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Codec`] if encoding fails and
    /// [`NetError::ChannelClosed`] once the connection is gone.
    pub fn send(&self, value: Out) -> Result<(), NetError> {
        (self.outbound)(value)
    }
}

impl<In, Out> fmt::Debug for Channel<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
