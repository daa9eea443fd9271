//! Configuration module for Hopsocks
//!
//! The `hopsocks` binary is driven by a TOML file listing the proxies to open
//! and the hops of each. The library itself never reads files; this module
//! turns the file into [`ProxyOptions`](crate::registry::ProxyOptions) and
//! [`HopSpec`](crate::chain::HopSpec) values.

mod options;
mod proxy;

pub use options::OptionsConfig;
pub use proxy::{HopConfig, ProxyConfig};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Settings shared by every proxy
    #[serde(default)]
    pub options: OptionsConfig,

    /// Proxies to open
    #[serde(default, rename = "proxy")]
    pub proxies: Vec<ProxyConfig>,
}

impl Config {
    /// Check the configuration as a whole
    pub fn validate(&self) -> Result<()> {
        self.options.validate()?;

        if self.proxies.is_empty() {
            bail!("No [[proxy]] entries configured");
        }

        let mut aliases = HashSet::new();
        let mut ports = HashSet::new();
        for proxy in &self.proxies {
            proxy
                .validate()
                .with_context(|| format!("Invalid proxy '{}'", proxy.alias))?;
            if !aliases.insert(proxy.alias.as_str()) {
                bail!("Duplicate proxy alias '{}'", proxy.alias);
            }
            if !ports.insert(proxy.listen_port) {
                bail!(
                    "Listen port {} is used by more than one proxy",
                    proxy.listen_port
                );
            }
        }
        Ok(())
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}
