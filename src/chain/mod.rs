//! Nested SSH tunnel chain
//!
//! Hops are opened strictly in order. Hop 0 is reached directly; every later
//! hop is reached through a [`LocalForwarder`] riding on the previous hop.
//! Teardown walks the hops in reverse.

pub mod connector;
pub mod forwarder;
pub mod hop;

pub use connector::{Channel, HopConnector, HopSession, TunnelStream};
pub use forwarder::LocalForwarder;
pub use hop::{validate_hops, Credential, HopSpec};

use crate::error::{ChainError, ChannelError, TeardownError};
use crate::helper::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_RELAY_BUFFER_SIZE};
use crate::ssh::HostKeyPolicy;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of a [`TunnelChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Created, nothing opened yet
    Idle,
    /// Hops are being opened
    Connecting,
    /// Every hop is up
    Established,
    /// Hops are being closed
    TearingDown,
    /// Nothing is open any more
    Closed,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainState::Idle => "idle",
            ChainState::Connecting => "connecting",
            ChainState::Established => "established",
            ChainState::TearingDown => "tearing-down",
            ChainState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Options applied to every hop of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOptions {
    /// Bound on connect + authenticate of a single hop, and on opening a
    /// downstream channel
    pub connect_timeout: Duration,
    /// How hop host keys are verified
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ChainOptions {
    fn default() -> Self {
        ChainOptions {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

/// One opened hop
#[derive(Debug)]
struct HopHandle {
    index: usize,
    endpoint: String,
    session: Arc<dyn HopSession>,
    /// Loopback forwarder through the previous hop, absent for hop 0
    forwarder: Option<LocalForwarder>,
}

impl HopHandle {
    /// Close the session, then the forwarder that carried it
    async fn close(self) -> Result<(), TeardownError> {
        let result = self.session.close().await;
        if let Some(forwarder) = self.forwarder {
            forwarder.close().await;
        }
        result.map_err(|e| TeardownError {
            index: self.index,
            hop: self.endpoint.clone(),
            cause: format!("{:#}", e),
        })
    }
}

#[derive(Debug)]
struct ChainInner {
    state: ChainState,
    hops: Vec<HopHandle>,
    /// Forwards opened with [`TunnelChain::forward_local`]
    forwards: Vec<LocalForwarder>,
}

/// Ordered chain of SSH hops
#[derive(Debug)]
pub struct TunnelChain {
    hops: Vec<HopSpec>,
    connector: Arc<dyn HopConnector>,
    options: ChainOptions,
    inner: Mutex<ChainInner>,
}

impl TunnelChain {
    /// Create an idle chain after validating the hop list
    pub fn new(
        hops: Vec<HopSpec>,
        connector: Arc<dyn HopConnector>,
        options: ChainOptions,
    ) -> Result<Self, ChainError> {
        validate_hops(&hops)?;
        Ok(TunnelChain {
            hops,
            connector,
            options,
            inner: Mutex::new(ChainInner {
                state: ChainState::Idle,
                hops: Vec::new(),
                forwards: Vec::new(),
            }),
        })
    }

    /// Validate `hops`, then open every hop in order
    pub async fn establish(
        hops: Vec<HopSpec>,
        connector: Arc<dyn HopConnector>,
        options: ChainOptions,
    ) -> Result<Self, ChainError> {
        let chain = Self::new(hops, connector, options)?;
        chain.connect().await?;
        Ok(chain)
    }

    /// Open hops 0..N-1 sequentially
    ///
    /// On failure at hop k, hops 0..k-1 are closed in reverse order before the
    /// error is returned and the chain ends up `Closed`.
    pub async fn connect(&self) -> Result<(), ChainError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != ChainState::Idle {
                return Err(ChainError::Configuration(format!(
                    "chain cannot connect from state {}",
                    inner.state
                )));
            }
            inner.state = ChainState::Connecting;
        }

        let mut opened: Vec<HopHandle> = Vec::with_capacity(self.hops.len());
        for (index, hop) in self.hops.iter().enumerate() {
            match self.open_hop(index, hop, opened.last()).await {
                Ok(handle) => {
                    info!("Hop {} established: {}", index, hop);
                    opened.push(handle);
                }
                Err(e) => {
                    warn!("Hop {} ({}) failed: {}", index, hop.endpoint(), e);
                    self.rollback(opened).await;
                    self.inner.lock().await.state = ChainState::Closed;
                    return Err(e);
                }
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.state != ChainState::Connecting {
            // Torn down while we were still connecting
            drop(inner);
            self.rollback(opened).await;
            return Err(ChainError::Configuration(
                "chain was torn down while connecting".to_string(),
            ));
        }
        inner.hops = opened;
        inner.state = ChainState::Established;
        info!("Tunnel chain established through {} hop(s)", self.hops.len());
        Ok(())
    }

    async fn open_hop(
        &self,
        index: usize,
        hop: &HopSpec,
        previous: Option<&HopHandle>,
    ) -> Result<HopHandle, ChainError> {
        let (forwarder, host, port) = match previous {
            None => (None, hop.address.clone(), hop.port),
            Some(prev) => {
                let forwarder = LocalForwarder::bind(
                    index,
                    prev.session.clone(),
                    hop.address.clone(),
                    hop.port,
                    DEFAULT_RELAY_BUFFER_SIZE,
                )
                .await?;
                let addr = forwarder.local_addr();
                (Some(forwarder), addr.ip().to_string(), addr.port())
            }
        };

        debug!("Connecting hop {} ({}) via {}:{}", index, hop.endpoint(), host, port);

        let timeout = self.options.connect_timeout;
        let connected = tokio::time::timeout(timeout, self.connector.connect(index, hop, &host, port))
            .await
            .map_err(|_| ChainError::ConnectTimeout { index, timeout })?;

        // Through a forwarder, a hop that cannot be reached from the previous
        // hop only shows up as a dropped connection; report the real cause.
        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                return Err(match forwarder.as_ref().and_then(LocalForwarder::take_error) {
                    Some(cause) => ChainError::Connect {
                        index,
                        source: cause.into_io_error(),
                    },
                    None => e,
                })
            }
        };

        Ok(HopHandle {
            index,
            endpoint: hop.endpoint(),
            session: Arc::from(session),
            forwarder,
        })
    }

    async fn rollback(&self, opened: Vec<HopHandle>) {
        for err in close_in_reverse(opened).await {
            warn!("Rollback: {}", err);
        }
    }

    /// Close every local forward, then every hop in reverse order
    ///
    /// Idempotent: calling it on a chain that is already closing or closed
    /// returns `Ok(())`. Individual close failures are collected, never
    /// short-circuited.
    pub async fn teardown(&self) -> Result<(), Vec<TeardownError>> {
        let (forwards, hops) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ChainState::TearingDown | ChainState::Closed => return Ok(()),
                _ => {}
            }
            inner.state = ChainState::TearingDown;
            (
                std::mem::take(&mut inner.forwards),
                std::mem::take(&mut inner.hops),
            )
        };

        for forward in forwards {
            forward.close().await;
        }
        let errors = close_in_reverse(hops).await;
        self.inner.lock().await.state = ChainState::Closed;

        if errors.is_empty() {
            info!("Tunnel chain closed");
            Ok(())
        } else {
            for err in &errors {
                warn!("Teardown: {}", err);
            }
            Err(errors)
        }
    }

    /// Open a new channel through the last hop to `host:port`
    pub async fn open_downstream_channel(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Channel, ChannelError> {
        let session = {
            let inner = self.inner.lock().await;
            if inner.state != ChainState::Established {
                return Err(ChannelError::ChainNotEstablished);
            }
            match inner.hops.last() {
                Some(last) => last.session.clone(),
                None => return Err(ChannelError::ChainNotEstablished),
            }
        };

        let timeout = self.options.connect_timeout;
        tokio::time::timeout(timeout, session.open_channel(host, port))
            .await
            .map_err(|_| ChannelError::Failed {
                target: format!("{}:{}", host, port),
                cause: format!("timed out after {:?}", timeout),
            })?
    }

    /// Bind a loopback port forwarding to `host:port` through the last hop
    ///
    /// Every connection accepted on the returned address rides a fresh
    /// channel of the last hop. The forward lives as long as the chain and is
    /// closed by [`TunnelChain::teardown`] before any hop.
    pub async fn forward_local(&self, host: &str, port: u16) -> Result<SocketAddr, ChannelError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ChainState::Established {
            return Err(ChannelError::ChainNotEstablished);
        }
        let session = match inner.hops.last() {
            Some(last) => last.session.clone(),
            None => return Err(ChannelError::ChainNotEstablished),
        };

        let forwarder = LocalForwarder::bind(
            self.hops.len(),
            session,
            host.to_string(),
            port,
            DEFAULT_RELAY_BUFFER_SIZE,
        )
        .await
        .map_err(|e| ChannelError::Failed {
            target: format!("{}:{}", host, port),
            cause: e.to_string(),
        })?;

        let local_addr = forwarder.local_addr();
        info!("Forwarding {} to {}:{} through the chain", local_addr, host, port);
        inner.forwards.push(forwarder);
        Ok(local_addr)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ChainState {
        self.inner.lock().await.state
    }

    /// Whether every hop is up
    pub async fn is_established(&self) -> bool {
        self.state().await == ChainState::Established
    }

    /// Number of hops in the chain
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// The hop descriptions, in order
    pub fn hops(&self) -> &[HopSpec] {
        &self.hops
    }
}

async fn close_in_reverse(hops: Vec<HopHandle>) -> Vec<TeardownError> {
    let mut errors = Vec::new();
    for handle in hops.into_iter().rev() {
        let index = handle.index;
        match handle.close().await {
            Ok(()) => debug!("Hop {} closed", index),
            Err(e) => errors.push(e),
        }
    }
    errors
}
