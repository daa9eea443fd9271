//! Shared proxy options

use crate::chain::ChainOptions;
use crate::helper::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_RELAY_BUFFER_SIZE,
};
use crate::registry::ProxyOptions;
use crate::ssh::HostKeyPolicy;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_relay_buffer_size() -> usize {
    DEFAULT_RELAY_BUFFER_SIZE
}

/// `[options]` table
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OptionsConfig {
    /// Per-hop connect + authenticate timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SOCKS5 handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Relay buffer size in bytes
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,

    /// Host key verification for every hop
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        OptionsConfig {
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            relay_buffer_size: default_relay_buffer_size(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl OptionsConfig {
    /// Reject values that would make every proxy unusable
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be greater than 0");
        }
        if self.handshake_timeout_secs == 0 {
            bail!("handshake_timeout_secs must be greater than 0");
        }
        if self.relay_buffer_size == 0 {
            bail!("relay_buffer_size must be greater than 0");
        }
        Ok(())
    }

    /// Library options equivalent to this table
    pub fn to_proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            chain: ChainOptions {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                host_key_policy: self.host_key_policy,
            },
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            relay_buffer_size: self.relay_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library() {
        let options = OptionsConfig::default().to_proxy_options();
        assert_eq!(options, ProxyOptions::default());
    }

    #[test]
    fn test_zero_values_rejected() {
        let options = OptionsConfig {
            connect_timeout_secs: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = OptionsConfig {
            relay_buffer_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        assert!(OptionsConfig::default().validate().is_ok());
    }
}
