//! Transport seam for the tunnel chain
//!
//! A [`HopConnector`] turns a [`HopSpec`] plus a reachable `host:port` into an
//! authenticated [`HopSession`]. The chain only ever talks to hops through
//! these traits; [`crate::ssh::SshConnector`] is the production implementation.

use super::hop::HopSpec;
use crate::error::{ChainError, ChannelError};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream carried by a hop
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

/// Forwarded channel handed out by a hop
pub type Channel = Box<dyn TunnelStream>;

/// Opens authenticated sessions to hops
#[async_trait]
pub trait HopConnector: Send + Sync + Debug {
    /// Connect to hop `index` at `host:port` and authenticate with its credential
    ///
    /// `host:port` is the hop's own address for hop 0 and the loopback
    /// forwarding port for every later hop. The caller bounds this call with
    /// the per-hop timeout.
    async fn connect(
        &self,
        index: usize,
        hop: &HopSpec,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn HopSession>, ChainError>;
}

/// An established, authenticated hop
#[async_trait]
pub trait HopSession: Send + Sync + Debug {
    /// Open a `direct-tcpip` style channel from this hop to `host:port`
    async fn open_channel(&self, host: &str, port: u16) -> Result<Channel, ChannelError>;

    /// Close the session
    async fn close(&self) -> anyhow::Result<()>;

    /// Whether the underlying transport is gone
    fn is_closed(&self) -> bool;
}
