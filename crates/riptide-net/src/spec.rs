//! Declarative server construction.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use riptide_core::dispatch::SynchronousDispatcher;
use riptide_core::Dispatcher;

use crate::channel::{Channel, ChannelConsumer};
use crate::codec::Codec;
use crate::error::NetError;
use crate::options::{SocketOptions, TlsOptions};
use crate::registry::{NetServer, ServerContext, ServerKind, ServerRegistry};

/// Builder describing a server; [`build`](Self::build) hands the validated
/// description to the registered factory.
///
/// # Example
///
/// ```rust,ignore
/// let server = ServerSpec::new()
///     .listen(([127, 0, 0, 1], 9000))
///     .codec(Arc::new(Utf8Codec))
///     .consumer(|channel| {
///         let out = channel.clone();
///         channel.inbound().consume(move |line| { let _ = out.send(line); });
///     })
///     .build(&registry, ServerKind::Tcp)?;
/// server.start()?;
/// ```
pub struct ServerSpec<In, Out> {
    listen: Option<SocketAddr>,
    options: SocketOptions,
    tls: Option<TlsOptions>,
    codec: Option<Arc<dyn Codec<In, Out>>>,
    consumers: Vec<ChannelConsumer<In, Out>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl<In, Out> Default for ServerSpec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> ServerSpec<In, Out> {
    /// Creates an empty spec with default socket options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listen: None,
            options: SocketOptions::default(),
            tls: None,
            codec: None,
            consumers: Vec::new(),
            dispatcher: None,
        }
    }

    /// Sets the address to bind.
    #[must_use]
    pub fn listen(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen = Some(addr.into());
        self
    }

    /// Sets socket options.
    #[must_use]
    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables or disables TLS.
    #[must_use]
    pub fn tls(mut self, tls: Option<TlsOptions>) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the frame codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec<In, Out>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Adds a callback run for each accepted channel.
    #[must_use]
    pub fn consumer<F>(mut self, consumer: F) -> Self
    where
        F: Fn(&Channel<In, Out>) + Send + Sync + 'static,
    {
        self.consumers.push(Arc::new(consumer));
        self
    }

    /// Sets the dispatcher delivering inbound values. Defaults to a
    /// synchronous dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validates the description and builds a `kind` server through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidSpec`] if the listen address or codec is
    /// missing, the options are invalid, or TLS is requested for a kind
    /// that cannot carry it; [`NetError::UnknownKind`] if no factory is
    /// registered for `kind`.
    pub fn build(
        self,
        registry: &ServerRegistry<In, Out>,
        kind: ServerKind,
    ) -> Result<Box<dyn NetServer>, NetError> {
        let listen = self
            .listen
            .ok_or_else(|| NetError::InvalidSpec("listen address is required".to_string()))?;
        let codec = self
            .codec
            .ok_or_else(|| NetError::InvalidSpec("codec is required".to_string()))?;
        self.options.validate()?;
        if let Some(tls) = &self.tls {
            if !kind.supports_tls() {
                return Err(NetError::InvalidSpec(format!("TLS is not supported for {kind}")));
            }
            tls.validate()?;
        }
        if self.consumers.is_empty() {
            tracing::warn!(%kind, %listen, "server built without channel consumers");
        }

        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(SynchronousDispatcher::new("net")));
        let context = ServerContext {
            kind,
            listen,
            options: self.options,
            tls: self.tls,
            codec,
            consumers: self.consumers,
            dispatcher,
        };
        tracing::info!(%kind, %listen, codec = context.codec.name(), "building server");
        registry.create(context)
    }
}

impl<In, Out> fmt::Debug for ServerSpec<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSpec")
            .field("listen", &self.listen)
            .field("options", &self.options)
            .field("tls", &self.tls)
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_string()))
            .field("consumers", &self.consumers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8Codec;
    use crate::testing::LoopbackFactory;

    fn registry() -> (ServerRegistry<String, String>, Arc<LoopbackFactory<String, String>>) {
        let registry = ServerRegistry::new();
        let factory = Arc::new(LoopbackFactory::new(ServerKind::Tcp));
        registry.register(Arc::clone(&factory) as _).unwrap();
        (registry, factory)
    }

    fn spec() -> ServerSpec<String, String> {
        ServerSpec::new()
            .listen(([127, 0, 0, 1], 9000))
            .codec(Arc::new(Utf8Codec))
    }

    #[test]
    fn test_listen_and_codec_required() {
        let (registry, _) = registry();
        let no_listen = ServerSpec::<String, String>::new().codec(Arc::new(Utf8Codec));
        assert!(matches!(
            no_listen.build(&registry, ServerKind::Tcp),
            Err(NetError::InvalidSpec(_))
        ));
        let no_codec = ServerSpec::<String, String>::new().listen(([127, 0, 0, 1], 9000));
        assert!(matches!(
            no_codec.build(&registry, ServerKind::Tcp),
            Err(NetError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_unregistered_kind() {
        let (registry, _) = registry();
        assert!(matches!(
            spec().build(&registry, ServerKind::Udp),
            Err(NetError::UnknownKind(ServerKind::Udp))
        ));
    }

    #[test]
    fn test_tls_over_udp_rejected() {
        let registry = ServerRegistry::new();
        registry
            .register(Arc::new(LoopbackFactory::<String, String>::new(ServerKind::Udp)))
            .unwrap();
        let result = spec()
            .tls(Some(TlsOptions::new("cert.pem", "key.pem")))
            .build(&registry, ServerKind::Udp);
        assert!(matches!(result, Err(NetError::InvalidSpec(_))));
    }

    #[test]
    fn test_build_passes_context_to_factory() {
        let (registry, factory) = registry();
        let server = spec()
            .tls(Some(TlsOptions::new("cert.pem", "key.pem")))
            .consumer(|_| {})
            .build(&registry, ServerKind::Tcp)
            .unwrap();
        assert_eq!(server.kind(), ServerKind::Tcp);
        assert_eq!(server.local_addr(), SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert!(!server.is_running());
        assert_eq!(factory.servers().len(), 1);
        assert!(factory.servers()[0].has_tls());
    }
}
