//! Hop descriptions
//!
//! A [`HopSpec`] is the immutable description of one SSH hop. Credentials are
//! supplied fully resolved by the caller.

use crate::error::ChainError;
use std::fmt;

/// Credential used to authenticate against one hop
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Public key authentication with an OpenSSH/PEM encoded private key
    PrivateKey {
        /// Encoded private key text
        key_data: String,
        /// Passphrase protecting the key, if any
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password(***)"),
            Credential::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("key_data", &"***")
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// Description of one SSH hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSpec {
    /// Host name or IP address, as seen from the previous hop
    pub address: String,
    /// SSH port
    pub port: u16,
    /// Login name
    pub username: String,
    /// Credential for `username`
    pub credential: Credential,
}

impl HopSpec {
    /// Create a hop authenticated by password
    pub fn with_password(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        HopSpec {
            address: address.into(),
            port,
            username: username.into(),
            credential: Credential::Password(password.into()),
        }
    }

    /// Create a hop authenticated by private key
    pub fn with_private_key(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_data: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        HopSpec {
            address: address.into(),
            port,
            username: username.into(),
            credential: Credential::PrivateKey {
                key_data: key_data.into(),
                passphrase,
            },
        }
    }

    /// `address:port` label used in logs and errors
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Check that the hop can be attempted at all
    pub fn validate(&self, index: usize) -> Result<(), ChainError> {
        if self.address.trim().is_empty() {
            return Err(ChainError::Configuration(format!(
                "hop {} has an empty address",
                index
            )));
        }
        if self.port == 0 {
            return Err(ChainError::Configuration(format!(
                "hop {} ({}) has invalid port 0",
                index, self.address
            )));
        }
        if self.username.is_empty() {
            return Err(ChainError::Configuration(format!(
                "hop {} ({}) has an empty username",
                index,
                self.endpoint()
            )));
        }
        if let Credential::PrivateKey { key_data, .. } = &self.credential {
            if key_data.trim().is_empty() {
                return Err(ChainError::Configuration(format!(
                    "hop {} ({}) has an empty private key",
                    index,
                    self.endpoint()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for HopSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}

/// Validate a whole hop list
pub fn validate_hops(hops: &[HopSpec]) -> Result<(), ChainError> {
    if hops.is_empty() {
        return Err(ChainError::Configuration(
            "hop list must not be empty".to_string(),
        ));
    }
    for (index, hop) in hops.iter().enumerate() {
        hop.validate(index)?;
    }
    Ok(())
}
