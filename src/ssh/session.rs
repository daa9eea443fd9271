//! Authenticated SSH session to one hop

use super::HopHandler;
use crate::chain::{Channel, HopSession};
use crate::error::ChannelError;
use anyhow::Context;
use async_trait::async_trait;
use russh::client::Handle;
use russh::{ChannelOpenFailure, Disconnect};
use std::fmt;
use tracing::debug;

/// Originator reported in `direct-tcpip` requests
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";

/// An established hop
pub struct SshSession {
    index: usize,
    endpoint: String,
    handle: Handle<HopHandler>,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("index", &self.index)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

impl SshSession {
    pub(super) fn new(index: usize, endpoint: String, handle: Handle<HopHandler>) -> Self {
        SshSession {
            index,
            endpoint,
            handle,
        }
    }
}

#[async_trait]
impl HopSession for SshSession {
    async fn open_channel(&self, host: &str, port: u16) -> Result<Channel, ChannelError> {
        let target = format!("{}:{}", host, port);
        match self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), ORIGINATOR_ADDRESS, 0)
            .await
        {
            Ok(channel) => {
                debug!("Hop {} opened channel to {}", self.index, target);
                Ok(Box::new(Box::pin(channel.into_stream())))
            }
            Err(russh::Error::ChannelOpenFailure(ChannelOpenFailure::ConnectFailed)) => {
                Err(ChannelError::Refused { target })
            }
            Err(e) => Err(ChannelError::Failed {
                target,
                cause: e.to_string(),
            }),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .with_context(|| format!("disconnect from hop {} ({})", self.index, self.endpoint))
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
