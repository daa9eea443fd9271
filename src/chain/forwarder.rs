//! Loopback port forwarding through an established hop
//!
//! A [`LocalForwarder`] binds `127.0.0.1:0` and carries every accepted
//! connection over a fresh channel of the upstream hop to a fixed target.
//! This is how hop i becomes reachable once hop i-1 is up:
//!
//! ```text
//! [hop i client] -> 127.0.0.1:<ephemeral> -> [hop i-1 channel] -> hop_i.address:hop_i.port
//! ```

use super::connector::HopSession;
use crate::error::{ChainError, ChannelError};
use crate::socks::relay::relay;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// First channel failure seen by a forwarder
type ErrorSlot = Arc<Mutex<Option<ChannelError>>>;

/// Loopback listener forwarding to a target through an upstream hop
///
/// The forwarding task, and every connection it carries, stops when the
/// forwarder is closed or dropped.
#[derive(Debug)]
pub struct LocalForwarder {
    index: usize,
    local_addr: SocketAddr,
    target: String,
    first_error: ErrorSlot,
    task: Option<JoinHandle<()>>,
}

impl LocalForwarder {
    /// Bind the loopback listener for hop `index` and start forwarding
    pub async fn bind(
        index: usize,
        upstream: Arc<dyn HopSession>,
        target_host: String,
        target_port: u16,
        buffer_size: usize,
    ) -> Result<Self, ChainError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|source| ChainError::PortBindFailed { index, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ChainError::PortBindFailed { index, source })?;

        let target = format!("{}:{}", target_host, target_port);
        debug!("Forwarder for hop {} listening on {} -> {}", index, local_addr, target);

        let first_error = ErrorSlot::default();
        let task = tokio::spawn(run_forwarder(
            index,
            listener,
            upstream,
            target_host,
            target_port,
            buffer_size,
            first_error.clone(),
        ));

        Ok(LocalForwarder {
            index,
            local_addr,
            target,
            first_error,
            task: Some(task),
        })
    }

    /// Loopback address the next hop should connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Forwarding target as host:port
    pub fn target(&self) -> &str {
        &self.target
    }

    /// First error the upstream hop returned when opening a channel, if any
    ///
    /// The slot is filled before the accepted connection is dropped, so a
    /// client that sees its connection closed can look up why.
    pub fn take_error(&self) -> Option<ChannelError> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stop forwarding and wait until the listener and its connections are gone
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Forwarder for hop {} on {} closed", self.index, self.local_addr);
        }
    }
}

impl Drop for LocalForwarder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_forwarder(
    index: usize,
    listener: TcpListener,
    upstream: Arc<dyn HopSession>,
    target_host: String,
    target_port: u16,
    buffer_size: usize,
    first_error: ErrorSlot,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Forwarder for hop {} accepted {}", index, peer);
                    let upstream = upstream.clone();
                    let target_host = target_host.clone();
                    let first_error = first_error.clone();
                    connections.spawn(async move {
                        match upstream.open_channel(&target_host, target_port).await {
                            Ok(channel) => {
                                let stats = relay(stream, channel, buffer_size).await;
                                debug!(
                                    "Forwarded connection for hop {} finished ({} up, {} down)",
                                    index, stats.client_to_remote, stats.remote_to_client
                                );
                            }
                            Err(e) => {
                                warn!(
                                    "Forwarder for hop {} could not reach {}:{}: {}",
                                    index, target_host, target_port, e
                                );
                                let mut slot =
                                    first_error.lock().unwrap_or_else(PoisonError::into_inner);
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                drop(slot);
                                drop(stream);
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("Forwarder for hop {} failed to accept: {}", index, e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}
