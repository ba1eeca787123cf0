//! Socket and TLS options carried by a server spec.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Listening socket options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    /// Accept backlog.
    pub backlog: u32,
    /// Read timeout (`None` = no timeout).
    pub timeout: Option<Duration>,
    /// `SO_KEEPALIVE`.
    pub keep_alive: bool,
    /// `TCP_NODELAY`.
    pub tcp_no_delay: bool,
    /// `SO_REUSEADDR`.
    pub reuse_addr: bool,
    /// `SO_LINGER` (`None` = disabled).
    pub linger: Option<Duration>,
    /// Receive buffer size in bytes.
    pub rcv_buf: usize,
    /// Send buffer size in bytes.
    pub snd_buf: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            backlog: 1000,
            timeout: Some(Duration::from_secs(30)),
            keep_alive: true,
            tcp_no_delay: true,
            reuse_addr: true,
            linger: None,
            rcv_buf: 1024 * 1024,
            snd_buf: 1024 * 1024,
        }
    }
}

impl SocketOptions {
    /// Checks the options for values no socket accepts.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidSpec`] for a zero backlog, a zero buffer
    /// size or a zero timeout.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.backlog == 0 {
            return Err(NetError::InvalidSpec("backlog must be positive".to_string()));
        }
        if self.rcv_buf == 0 || self.snd_buf == 0 {
            return Err(NetError::InvalidSpec(
                "socket buffers must be positive".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(NetError::InvalidSpec(
                "timeout must be positive; use None to disable it".to_string(),
            ));
        }
        Ok(())
    }
}

/// TLS material for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Certificate chain, PEM.
    pub cert_path: PathBuf,
    /// Private key, PEM.
    pub key_path: PathBuf,
    /// Trusted client CAs, PEM. `None` disables client authentication.
    pub trust_path: Option<PathBuf>,
    /// Protocol name, e.g. `TLSv1.3`.
    pub protocol: String,
}

impl TlsOptions {
    /// Creates options for a certificate and key, TLS 1.3, no client auth.
    #[must_use]
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            trust_path: None,
            protocol: "TLSv1.3".to_string(),
        }
    }

    /// Checks that the required paths and protocol are set.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidSpec`] for an empty path or protocol.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.cert_path.as_os_str().is_empty() || self.key_path.as_os_str().is_empty() {
            return Err(NetError::InvalidSpec(
                "TLS requires a certificate and a key".to_string(),
            ));
        }
        if self.protocol.is_empty() {
            return Err(NetError::InvalidSpec("TLS protocol is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_options_are_valid() {
        assert!(SocketOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut opts = SocketOptions {
            backlog: 0,
            ..SocketOptions::default()
        };
        assert!(opts.validate().is_err());
        opts.backlog = 10;
        opts.timeout = Some(Duration::ZERO);
        assert!(opts.validate().is_err());
        opts.timeout = None;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_tls_requires_paths() {
        assert!(TlsOptions::new("cert.pem", "key.pem").validate().is_ok());
        assert!(TlsOptions::new("", "key.pem").validate().is_err());
    }

    #[test]
    fn test_options_serialize() {
        let json = serde_json::to_value(SocketOptions::default()).unwrap();
        assert_eq!(json["backlog"], 1000);
        assert_eq!(json["tcp_no_delay"], true);
        let back: SocketOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back, SocketOptions::default());
    }
}
