//! `[[proxy]]` and `[[proxy.hop]]` tables

use crate::chain::HopSpec;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

fn default_ssh_port() -> u16 {
    22
}

/// One proxy to open
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Unique alias
    pub alias: String,

    /// Loopback port the SOCKS5 server listens on
    pub listen_port: u16,

    /// Hops in connection order
    #[serde(default, rename = "hop")]
    pub hops: Vec<HopConfig>,
}

impl ProxyConfig {
    /// Check the entry without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.alias.trim().is_empty() {
            bail!("alias must not be empty");
        }
        if self.listen_port == 0 {
            bail!("listen_port must not be 0");
        }
        if self.hops.is_empty() {
            bail!("at least one [[proxy.hop]] is required");
        }
        for (index, hop) in self.hops.iter().enumerate() {
            hop.validate()
                .with_context(|| format!("hop {} ({})", index, hop.address))?;
        }
        Ok(())
    }

    /// Resolve every hop, reading key files relative to `base_dir`
    pub fn hop_specs(&self, base_dir: &Path) -> Result<Vec<HopSpec>> {
        self.hops
            .iter()
            .enumerate()
            .map(|(index, hop)| {
                hop.to_hop_spec(base_dir).with_context(|| {
                    format!("proxy '{}' hop {} ({})", self.alias, index, hop.address)
                })
            })
            .collect()
    }
}

/// One hop of a proxy
#[derive(Serialize, Deserialize, Clone)]
pub struct HopConfig {
    /// Host name or IP, as seen from the previous hop
    pub address: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login name
    pub username: String,

    /// Password, exclusive with `key_file`
    #[serde(default)]
    pub password: Option<String>,

    /// Private key file, exclusive with `password`
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Passphrase for `key_file`
    #[serde(default)]
    pub key_passphrase: Option<String>,
}

impl fmt::Debug for HopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file)
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HopConfig {
    /// Check the entry without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            bail!("address must not be empty");
        }
        if self.port == 0 {
            bail!("port must not be 0");
        }
        if self.username.is_empty() {
            bail!("username must not be empty");
        }
        match (&self.password, &self.key_file) {
            (Some(_), Some(_)) => bail!("password and key_file are mutually exclusive"),
            (None, None) => bail!("either password or key_file is required"),
            (Some(_), None) if self.key_passphrase.is_some() => {
                bail!("key_passphrase requires key_file")
            }
            _ => Ok(()),
        }
    }

    /// Build the hop, loading the key file if one is configured
    pub fn to_hop_spec(&self, base_dir: &Path) -> Result<HopSpec> {
        self.validate()?;

        if let Some(password) = &self.password {
            return Ok(HopSpec::with_password(
                self.address.clone(),
                self.port,
                self.username.clone(),
                password.clone(),
            ));
        }

        let key_file = match &self.key_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => bail!("either password or key_file is required"),
        };
        let key_data = std::fs::read_to_string(&key_file)
            .with_context(|| format!("Failed to read key file: {:?}", key_file))?;

        Ok(HopSpec::with_private_key(
            self.address.clone(),
            self.port,
            self.username.clone(),
            key_data,
            self.key_passphrase.clone(),
        ))
    }
}
