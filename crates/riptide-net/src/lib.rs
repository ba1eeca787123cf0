//! # Riptide Net
//!
//! Transport boundary for riptide pipelines.
//!
//! Servers are never looked up by name at runtime. Each implementation
//! provides a [`ServerFactory`] registered for a [`ServerKind`] in a
//! [`ServerRegistry`]; a [`ServerSpec`] validates listen address, socket
//! options, TLS and codec, then asks the registry to build the server.
//!
//! ## Module Overview
//!
//! - [`registry`] - server kinds, factories and the registry
//! - [`spec`] - declarative server builder
//! - [`options`] - socket and TLS options
//! - [`codec`] - frame codecs
//! - [`channel`] - accepted connections as seen by consumers
//! - [`testing`] - in-memory transport for tests

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod codec;
pub mod error;
pub mod options;
pub mod registry;
pub mod spec;
pub mod testing;

pub use channel::{Channel, ChannelConsumer};
pub use codec::{Codec, JsonCodec, Utf8Codec};
pub use error::NetError;
pub use options::{SocketOptions, TlsOptions};
pub use registry::{NetServer, ServerContext, ServerFactory, ServerKind, ServerRegistry};
pub use spec::ServerSpec;
