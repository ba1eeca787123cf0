//! Server factory registry.
//!
//! The [`ServerRegistry`] maps each [`ServerKind`] to the factory that
//! builds it. Server implementations register themselves once; a
//! [`ServerSpec`](crate::spec::ServerSpec) then asks the registry for the
//! kind it wants.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;
use riptide_core::Dispatcher;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelConsumer;
use crate::codec::Codec;
use crate::error::NetError;
use crate::options::{SocketOptions, TlsOptions};

/// Concrete server variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServerKind {
    /// Stream sockets.
    Tcp,
    /// Datagram sockets.
    Udp,
}

impl ServerKind {
    /// Returns true if the transport can carry TLS.
    #[must_use]
    pub fn supports_tls(self) -> bool {
        matches!(self, Self::Tcp)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for ServerKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(NetError::InvalidSpec(format!("unknown server kind '{other}'"))),
        }
    }
}

/// Everything a factory needs to build a server.
pub struct ServerContext<In, Out> {
    /// Requested server kind.
    pub kind: ServerKind,
    /// Address to bind.
    pub listen: SocketAddr,
    /// Socket options.
    pub options: SocketOptions,
    /// TLS material, if enabled.
    pub tls: Option<TlsOptions>,
    /// Frame codec.
    pub codec: Arc<dyn Codec<In, Out>>,
    /// Callbacks run for each accepted channel.
    pub consumers: Vec<ChannelConsumer<In, Out>>,
    /// Dispatcher delivering inbound values.
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl<In, Out> fmt::Debug for ServerContext<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("kind", &self.kind)
            .field("listen", &self.listen)
            .field("options", &self.options)
            .field("tls", &self.tls.is_some())
            .field("codec", &self.codec.name())
            .field("consumers", &self.consumers.len())
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}

/// A built server.
pub trait NetServer: Send + Sync {
    /// Server kind.
    fn kind(&self) -> ServerKind;

    /// Starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] if already started and
    /// [`NetError::Io`] if the socket cannot be bound.
    fn start(&self) -> Result<(), NetError>;

    /// Stops accepting and closes every channel.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] if not started.
    fn shutdown(&self) -> Result<(), NetError>;

    /// Bound address.
    fn local_addr(&self) -> SocketAddr;

    /// Returns true between `start` and `shutdown`.
    fn is_running(&self) -> bool;
}

/// Builds servers of one kind.
pub trait ServerFactory<In, Out>: Send + Sync {
    /// The kind this factory builds.
    fn kind(&self) -> ServerKind;

    /// Builds a server from a validated context.
    ///
    /// # Errors
    ///
    /// Returns implementation specific construction failures.
    fn create(&self, context: ServerContext<In, Out>) -> Result<Box<dyn NetServer>, NetError>;
}

/// Registry of server factories keyed by kind.
pub struct ServerRegistry<In, Out> {
    factories: Arc<RwLock<FxHashMap<ServerKind, Arc<dyn ServerFactory<In, Out>>>>>,
}

impl<In, Out> Clone for ServerRegistry<In, Out> {
    fn clone(&self) -> Self {
        Self {
            factories: Arc::clone(&self.factories),
        }
    }
}

impl<In, Out> Default for ServerRegistry<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> ServerRegistry<In, Out> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    /// Registers `factory` under its kind.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::DuplicateFactory`] if the kind is taken.
    pub fn register(&self, factory: Arc<dyn ServerFactory<In, Out>>) -> Result<(), NetError> {
        let kind = factory.kind();
        let mut factories = self.factories.write();
        if factories.contains_key(&kind) {
            return Err(NetError::DuplicateFactory(kind));
        }
        tracing::debug!(%kind, "server factory registered");
        factories.insert(kind, factory);
        Ok(())
    }

    /// Returns true if a factory is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: ServerKind) -> bool {
        self.factories.read().contains_key(&kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ServerKind> {
        let mut kinds: Vec<_> = self.factories.read().keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds a server with the factory registered for `context.kind`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::UnknownKind`] if no factory is registered, or the
    /// factory's own error.
    pub fn create(&self, context: ServerContext<In, Out>) -> Result<Box<dyn NetServer>, NetError> {
        let factory = self
            .factories
            .read()
            .get(&context.kind)
            .cloned()
            .ok_or(NetError::UnknownKind(context.kind))?;
        factory.create(context)
    }
}

impl<In, Out> fmt::Debug for ServerRegistry<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
