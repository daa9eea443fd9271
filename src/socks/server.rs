//! Local SOCKS5 server
//!
//! One accept loop task owns the listener and a [`JoinSet`] holding one task
//! per client connection. Stopping the server aborts every connection task
//! (closing its socket and channel) and then drops the listener.

use super::command::{build_reply, parse_request};
use super::consts::SOCKS5_REPLY_SUCCEEDED;
use super::handshake::negotiate_method;
use super::relay::relay;
use super::types::{ConnectionState, TargetAddr};
use crate::chain::{Channel, TunnelChain};
use crate::error::{ChannelError, ErrorCategory, Socks5Error};
use crate::helper::{DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_RELAY_BUFFER_SIZE};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Source of downstream channels for CONNECT requests
#[async_trait]
pub trait DownstreamOpener: Send + Sync {
    /// Open a channel to `target` on the far side of the tunnel
    async fn open_downstream(&self, target: &TargetAddr) -> Result<Channel, ChannelError>;
}

#[async_trait]
impl DownstreamOpener for TunnelChain {
    async fn open_downstream(&self, target: &TargetAddr) -> Result<Channel, ChannelError> {
        self.open_downstream_channel(&target.host(), target.port())
            .await
    }
}

/// Per-connection settings of the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Time a client gets to finish greeting and request
    pub handshake_timeout: Duration,
    /// Buffer size of each relay direction
    pub relay_buffer_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            relay_buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
        }
    }
}

/// Running SOCKS5 server
#[derive(Debug)]
pub struct Socks5Server {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Socks5Server {
    /// Start accepting clients on `listener`
    pub fn start(
        listener: TcpListener,
        opener: Arc<dyn DownstreamOpener>,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let active = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(accept_loop(
            listener,
            opener,
            options,
            active.clone(),
            shutdown_rx,
        ));

        info!("SOCKS5 server listening on {}", local_addr);

        Ok(Socks5Server {
            local_addr,
            active,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently relaying
    pub fn active_relays(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting, terminate all connections and release the port
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("SOCKS5 accept loop on {} ended abnormally: {}", self.local_addr, e);
            }
        }
        info!("SOCKS5 server on {} stopped", self.local_addr);
    }
}

impl Drop for Socks5Server {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    opener: Arc<dyn DownstreamOpener>,
    options: ServerOptions,
    active: Arc<AtomicUsize>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted SOCKS5 client {}", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        opener.clone(),
                        options.clone(),
                        active.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Failed to accept SOCKS5 client: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },

            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("SOCKS5 connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    debug!("Terminating {} SOCKS5 connection(s)", connections.len());
    connections.shutdown().await;
    drop(listener);
}

/// Counts a connection as relaying for as long as it is alive
struct RelayGuard(Arc<AtomicUsize>);

impl RelayGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        RelayGuard(active)
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    opener: Arc<dyn DownstreamOpener>,
    options: ServerOptions,
    active: Arc<AtomicUsize>,
) {
    let _ = stream.set_nodelay(true);

    let mut state = ConnectionState::AwaitingGreeting;
    let handshake = async {
        negotiate_method(&mut stream).await?;
        state = ConnectionState::AwaitingRequest;
        parse_request(&mut stream).await
    };
    let result = match tokio::time::timeout(options.handshake_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(Socks5Error::HandshakeTimeout),
    };

    let target = match result {
        Ok(target) => target,
        Err(e) => {
            if let Some(code) = e.reply_code() {
                let _ = build_reply(&mut stream, code).await;
            }
            if e.category() == ErrorCategory::Protocol {
                warn!("SOCKS5 client {} rejected while {}: {}", peer, state, e);
            } else {
                debug!("SOCKS5 client {} dropped while {}: {}", peer, state, e);
            }
            return;
        }
    };

    let channel = match opener.open_downstream(&target).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!("CONNECT {} for {} failed: {}", target, peer, e);
            let _ = build_reply(&mut stream, e.reply_code()).await;
            return;
        }
    };

    let _guard = RelayGuard::new(active);
    if let Err(e) = build_reply(&mut stream, SOCKS5_REPLY_SUCCEEDED).await {
        debug!("SOCKS5 client {} went away before relaying: {}", peer, e);
        return;
    }

    state = ConnectionState::Relaying;
    debug!("{} -> {} {}", peer, target, state);

    let stats = relay(stream, channel, options.relay_buffer_size).await;

    state = ConnectionState::Closed;
    debug!(
        "{} -> {} {} ({} bytes up, {} bytes down)",
        peer, target, state, stats.client_to_remote, stats.remote_to_client
    );
}
