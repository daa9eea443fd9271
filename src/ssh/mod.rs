//! SSH transport for the tunnel chain
//!
//! [`SshConnector`] is the production [`HopConnector`]: it opens a TCP
//! connection to the reachable address of a hop, runs the SSH handshake over
//! it with `russh`, authenticates and hands back an [`SshSession`].

mod auth;
mod handler;
mod session;

pub use handler::HopHandler;
pub use session::SshSession;

use crate::chain::{HopConnector, HopSession, HopSpec};
use crate::error::ChainError;
use crate::helper::apply_hop_socket_opts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Keepalive sent on idle hop sessions
const SSH_KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// How the host key presented by a hop is verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept whatever key the hop presents
    #[default]
    AcceptAny,
    /// Require the key to be listed in the user's `~/.ssh/known_hosts`
    KnownHosts,
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => write!(f, "accept-any"),
            HostKeyPolicy::KnownHosts => write!(f, "known-hosts"),
        }
    }
}

/// Opens SSH sessions to hops
#[derive(Clone)]
pub struct SshConnector {
    policy: HostKeyPolicy,
    config: Arc<russh::client::Config>,
}

impl fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnector")
            .field("policy", &self.policy)
            .finish()
    }
}

impl SshConnector {
    /// Create a connector verifying host keys with `policy`
    pub fn new(policy: HostKeyPolicy) -> Self {
        let config = russh::client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(SSH_KEEPALIVE_INTERVAL_SECS)),
            ..Default::default()
        };
        SshConnector {
            policy,
            config: Arc::new(config),
        }
    }

    /// Host key policy in use
    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(HostKeyPolicy::default())
    }
}

#[async_trait]
impl HopConnector for SshConnector {
    async fn connect(
        &self,
        index: usize,
        hop: &HopSpec,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn HopSession>, ChainError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ChainError::Connect { index, source })?;
        if let Err(e) = apply_hop_socket_opts(&stream) {
            debug!("Could not tune socket for hop {}: {}", index, e);
        }

        // Host keys are checked against the hop's real name, not the
        // loopback forwarder it is reached through.
        let handler = HopHandler::new(index, hop.address.clone(), hop.port, self.policy);
        let mut handle = russh::client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| handshake_error(index, e))?;

        auth::authenticate(&mut handle, index, hop).await?;
        debug!("Authenticated as {} on hop {}", hop.username, index);

        Ok(Box::new(SshSession::new(index, hop.endpoint(), handle)))
    }
}

/// Map a russh failure during connect/authenticate to a chain error
pub(crate) fn handshake_error(index: usize, err: russh::Error) -> ChainError {
    match err {
        russh::Error::IO(source) => ChainError::Connect { index, source },
        russh::Error::UnknownKey => ChainError::Handshake {
            index,
            cause: "host key rejected".to_string(),
        },
        other => ChainError::Handshake {
            index,
            cause: other.to_string(),
        },
    }
}
