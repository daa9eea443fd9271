//! russh client handler for one hop

use super::HostKeyPolicy;
use russh::client::Handler;
use russh::keys::PublicKey;
use tracing::{debug, warn};

/// Client handler verifying the host key of a single hop
#[derive(Debug, Clone)]
pub struct HopHandler {
    index: usize,
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HopHandler {
    /// Create a handler for hop `index` known as `host:port`
    pub fn new(index: usize, host: String, port: u16, policy: HostKeyPolicy) -> Self {
        HopHandler {
            index,
            host,
            port,
            policy,
        }
    }
}

impl Handler for HopHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAny => {
                debug!(
                    "Accepting host key of hop {} ({}:{})",
                    self.index, self.host, self.port
                );
                Ok(true)
            }
            HostKeyPolicy::KnownHosts => {
                match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!(
                            "Host key of hop {} ({}:{}) is not in known_hosts",
                            self.index, self.host, self.port
                        );
                        Ok(false)
                    }
                    Err(e) => {
                        warn!(
                            "Host key of hop {} ({}:{}) rejected: {}",
                            self.index, self.host, self.port, e
                        );
                        Ok(false)
                    }
                }
            }
        }
    }
}
