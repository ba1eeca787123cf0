//! In-memory transport for testing server consumers and codecs.
//!
//! [`LoopbackFactory`] builds servers that never touch a socket: tests open
//! channels with [`LoopbackServer::connect`], push raw frames through the
//! returned [`LoopbackClient`] and read back whatever the consumers wrote.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use riptide_core::Broadcaster;

use crate::channel::{Channel, OutboundSink};
use crate::error::NetError;
use crate::registry::{NetServer, ServerContext, ServerFactory, ServerKind};

/// Factory for [`LoopbackServer`]s. Keeps every server it built.
pub struct LoopbackFactory<In, Out> {
    kind: ServerKind,
    servers: Mutex<Vec<Arc<LoopbackServer<In, Out>>>>,
}

impl<In, Out> LoopbackFactory<In, Out> {
    /// Creates a factory registering under `kind`.
    #[must_use]
    pub fn new(kind: ServerKind) -> Self {
        Self {
            kind,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Servers built so far, in build order.
    #[must_use]
    pub fn servers(&self) -> Vec<Arc<LoopbackServer<In, Out>>> {
        self.servers.lock().clone()
    }
}

impl<In, Out> ServerFactory<In, Out> for LoopbackFactory<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
{
    fn kind(&self) -> ServerKind {
        self.kind
    }

    fn create(&self, context: ServerContext<In, Out>) -> Result<Box<dyn NetServer>, NetError> {
        let server = Arc::new(LoopbackServer {
            context,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            open: Mutex::new(Vec::new()),
        });
        self.servers.lock().push(Arc::clone(&server));
        Ok(Box::new(LoopbackHandle(server)))
    }
}

/// Server whose channels are opened by the test.
pub struct LoopbackServer<In, Out> {
    context: ServerContext<In, Out>,
    running: AtomicBool,
    next_id: AtomicU64,
    open: Mutex<Vec<Broadcaster<In>>>,
}

impl<In, Out> LoopbackServer<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
{
    /// Returns true if the server was built with TLS.
    #[must_use]
    pub fn has_tls(&self) -> bool {
        self.context.tls.is_some()
    }

    /// Accepts a channel from `remote` and runs every consumer on it.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidState`] unless the server is running.
    pub fn connect(&self, remote: SocketAddr) -> Result<LoopbackClient<In>, NetError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NetError::InvalidState {
                expected: "running".to_string(),
                actual: "stopped".to_string(),
            });
        }

        let inbound = Broadcaster::with_dispatcher(Arc::clone(&self.context.dispatcher));
        let written = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let codec = Arc::clone(&self.context.codec);
        let sink_written = Arc::clone(&written);
        let sink_closed = Arc::clone(&closed);
        let outbound: OutboundSink<Out> = Arc::new(move |value: Out| {
            if sink_closed.load(Ordering::Acquire) {
                return Err(NetError::ChannelClosed(remote));
            }
            let frame = codec.encode(&value)?;
            sink_written.lock().push(frame);
            Ok(())
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::new(id, remote, inbound.stream(), outbound);
        for consumer in &self.context.consumers {
            consumer(&channel);
        }
        self.open.lock().push(inbound.clone());
        tracing::debug!(channel = id, %remote, "loopback channel accepted");

        Ok(LoopbackClient {
            inbound,
            decode: Arc::new({
                let codec = Arc::clone(&self.context.codec);
                move |frame: &[u8]| codec.decode(frame)
            }),
            written,
            closed,
        })
    }
}

struct LoopbackHandle<In, Out>(Arc<LoopbackServer<In, Out>>);

impl<In, Out> NetServer for LoopbackHandle<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
{
    fn kind(&self) -> ServerKind {
        self.0.context.kind
    }

    fn start(&self) -> Result<(), NetError> {
        if self.0.running.swap(true, Ordering::AcqRel) {
            return Err(NetError::InvalidState {
                expected: "stopped".to_string(),
                actual: "running".to_string(),
            });
        }
        tracing::info!(kind = %self.0.context.kind, listen = %self.0.context.listen, "loopback server started");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), NetError> {
        if !self.0.running.swap(false, Ordering::AcqRel) {
            return Err(NetError::InvalidState {
                expected: "running".to_string(),
                actual: "stopped".to_string(),
            });
        }
        let open = std::mem::take(&mut *self.0.open.lock());
        for inbound in open {
            inbound.on_complete();
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.0.context.listen
    }

    fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Acquire)
    }
}

type DecodeFn<In> = Arc<dyn Fn(&[u8]) -> Result<In, NetError> + Send + Sync>;

/// Peer side of a loopback channel.
pub struct LoopbackClient<In> {
    inbound: Broadcaster<In>,
    decode: DecodeFn<In>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl<In: Clone + Send + 'static> LoopbackClient<In> {
    /// Decodes `frame` and delivers it to the channel's inbound stream.
    ///
    /// # Errors
    ///
    /// Returns the codec's error for a malformed frame.
    pub fn send_frame(&self, frame: &[u8]) -> Result<(), NetError> {
        let value = (self.decode)(frame)?;
        self.inbound.on_next(value);
        Ok(())
    }

    /// Frames written by the server so far.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    /// Disconnects: completes the inbound stream and closes the outbound
    /// sink.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inbound.on_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8Codec;
    use crate::registry::ServerRegistry;
    use crate::spec::ServerSpec;

    fn echo_server() -> (Box<dyn NetServer>, Arc<LoopbackFactory<String, String>>) {
        let registry = ServerRegistry::new();
        let factory = Arc::new(LoopbackFactory::new(ServerKind::Tcp));
        registry.register(Arc::clone(&factory) as _).unwrap();
        let server = ServerSpec::new()
            .listen(([127, 0, 0, 1], 7000))
            .codec(Arc::new(Utf8Codec))
            .consumer(|channel: &Channel<String, String>| {
                let out = channel.clone();
                let _control = channel.inbound().map(|s: String| Ok(s.to_uppercase())).consume(
                    move |reply| {
                        let _ = out.send(reply);
                    },
                );
            })
            .build(&registry, ServerKind::Tcp)
            .unwrap();
        (server, factory)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 5555))
    }

    #[test]
    fn test_connect_requires_running_server() {
        let (server, factory) = echo_server();
        assert!(factory.servers()[0].connect(peer()).is_err());
        server.start().unwrap();
        assert!(server.start().is_err());
        assert!(factory.servers()[0].connect(peer()).is_ok());
    }

    #[test]
    fn test_echo_through_consumer() {
        let (server, factory) = echo_server();
        server.start().unwrap();
        let client = factory.servers()[0].connect(peer()).unwrap();
        client.send_frame(b"hello").unwrap();
        client.send_frame(b"world").unwrap();
        assert_eq!(client.written(), vec![b"HELLO".to_vec(), b"WORLD".to_vec()]);
    }

    #[test]
    fn test_malformed_frame_is_a_codec_error() {
        let (server, factory) = echo_server();
        server.start().unwrap();
        let client = factory.servers()[0].connect(peer()).unwrap();
        assert!(matches!(
            client.send_frame(&[0xc3, 0x28]),
            Err(NetError::Codec { .. })
        ));
        assert!(client.written().is_empty());
    }

    #[test]
    fn test_shutdown_closes_channels() {
        let (server, factory) = echo_server();
        server.start().unwrap();
        let client = factory.servers()[0].connect(peer()).unwrap();
        server.shutdown().unwrap();
        assert!(!server.is_running());
        assert!(server.shutdown().is_err());
        client.send_frame(b"late").unwrap();
        assert!(client.written().is_empty());
    }
}
