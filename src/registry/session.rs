//! One open proxy session and the records describing it

use crate::chain::{ChainOptions, TunnelChain};
use crate::error::TeardownError;
use crate::helper::{DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_RELAY_BUFFER_SIZE};
use crate::socks::{ServerOptions, Socks5Server};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options applied to every proxy a registry opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Options for the tunnel chain
    pub chain: ChainOptions,
    /// Time a SOCKS5 client gets to finish its handshake
    pub handshake_timeout: Duration,
    /// Buffer size of each relay direction
    pub relay_buffer_size: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        ProxyOptions {
            chain: ChainOptions::default(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            relay_buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
        }
    }
}

impl ProxyOptions {
    /// Settings handed to the SOCKS5 server
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            handshake_timeout: self.handshake_timeout,
            relay_buffer_size: self.relay_buffer_size,
        }
    }
}

/// Status reported by open/close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    /// The proxy is accepting clients
    Started,
    /// The proxy is gone
    Closed,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::Started => write!(f, "started"),
            ProxyStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Result of a successful open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyOpened {
    /// Always [`ProxyStatus::Started`]
    pub status: ProxyStatus,
    /// Alias of the session
    pub alias: String,
    /// Loopback port the SOCKS5 server listens on
    pub listen_port: u16,
    /// Number of hops in the chain
    pub hop_count: usize,
}

/// Result of a close
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyClosed {
    /// Alias of the session
    pub alias: String,
    /// Always [`ProxyStatus::Closed`]
    pub status: ProxyStatus,
    /// Hops that did not close cleanly, in teardown order
    pub teardown_errors: Vec<TeardownError>,
}

impl ProxyClosed {
    /// Whether every hop closed cleanly
    pub fn is_clean(&self) -> bool {
        self.teardown_errors.is_empty()
    }
}

/// Snapshot of an open session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyInfo {
    /// Alias of the session
    pub alias: String,
    /// Loopback port the SOCKS5 server listens on
    pub listen_port: u16,
    /// Number of hops in the chain
    pub hop_count: usize,
    /// Connections currently relaying
    pub active_relays: usize,
}

/// An open proxy: a chain plus the SOCKS5 server feeding it
#[derive(Debug)]
pub struct ProxySession {
    alias: String,
    listen_port: u16,
    chain: Arc<TunnelChain>,
    server: Socks5Server,
}

impl ProxySession {
    pub(super) fn new(
        alias: String,
        listen_port: u16,
        chain: Arc<TunnelChain>,
        server: Socks5Server,
    ) -> Self {
        ProxySession {
            alias,
            listen_port,
            chain,
            server,
        }
    }

    /// Record returned to the caller of open
    pub fn opened(&self) -> ProxyOpened {
        ProxyOpened {
            status: ProxyStatus::Started,
            alias: self.alias.clone(),
            listen_port: self.listen_port,
            hop_count: self.chain.hop_count(),
        }
    }

    /// Current snapshot
    pub fn info(&self) -> ProxyInfo {
        ProxyInfo {
            alias: self.alias.clone(),
            listen_port: self.listen_port,
            hop_count: self.chain.hop_count(),
            active_relays: self.server.active_relays(),
        }
    }

    /// Stop the server, terminate its relays, then tear the chain down
    pub(super) async fn close(self) -> ProxyClosed {
        self.server.stop().await;

        let teardown_errors = match self.chain.teardown().await {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        info!(
            "Proxy '{}' on port {} closed ({} teardown error(s))",
            self.alias,
            self.listen_port,
            teardown_errors.len()
        );

        ProxyClosed {
            alias: self.alias,
            status: ProxyStatus::Closed,
            teardown_errors,
        }
    }
}
