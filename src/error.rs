//! Error types for Hopsocks
//!
//! This module defines all custom error types used throughout the library.
//! Every error maps onto an [`ErrorCategory`] so callers can report failures
//! uniformly whatever layer produced them.

use crate::socks::consts::*;
use serde::Serialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Broad classification of every error the library can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Empty hop list, invalid port or host
    Configuration,
    /// A hop rejected our credentials
    Authentication,
    /// Timeouts, DNS failures, refused connections
    Network,
    /// Malformed SOCKS5 traffic or SSH handshake failures
    Protocol,
    /// Local resources unavailable (port bound, alias taken)
    Resource,
}

/// Errors raised while establishing a tunnel chain
///
/// Every hop-level variant carries the 0-based index of the failing hop.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The hop list or one of its entries is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The hop refused our credentials
    #[error("Authentication failed at hop {index}: {cause}")]
    AuthenticationFailed {
        /// Index of the failing hop
        index: usize,
        /// Human-readable cause
        cause: String,
    },

    /// Connect + authenticate did not finish in time
    #[error("Connect timeout at hop {index} after {timeout:?}")]
    ConnectTimeout {
        /// Index of the failing hop
        index: usize,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The loopback forwarding listener for the hop could not be bound
    #[error("Failed to bind forwarding port for hop {index}: {source}")]
    PortBindFailed {
        /// Index of the failing hop
        index: usize,
        /// Underlying bind error
        #[source]
        source: io::Error,
    },

    /// TCP-level failure reaching the hop (DNS, refused, reset)
    #[error("Failed to connect to hop {index}: {source}")]
    Connect {
        /// Index of the failing hop
        index: usize,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// SSH protocol failure, including host key rejection
    #[error("SSH handshake failed at hop {index}: {cause}")]
    Handshake {
        /// Index of the failing hop
        index: usize,
        /// Human-readable cause
        cause: String,
    },
}

impl ChainError {
    /// Index of the hop that failed, if the error is hop specific
    pub fn hop_index(&self) -> Option<usize> {
        match self {
            ChainError::Configuration(_) => None,
            ChainError::AuthenticationFailed { index, .. }
            | ChainError::ConnectTimeout { index, .. }
            | ChainError::PortBindFailed { index, .. }
            | ChainError::Connect { index, .. }
            | ChainError::Handshake { index, .. } => Some(*index),
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChainError::Configuration(_) => ErrorCategory::Configuration,
            ChainError::AuthenticationFailed { .. } => ErrorCategory::Authentication,
            ChainError::ConnectTimeout { .. } | ChainError::Connect { .. } => {
                ErrorCategory::Network
            }
            ChainError::PortBindFailed { .. } => ErrorCategory::Resource,
            ChainError::Handshake { .. } => ErrorCategory::Protocol,
        }
    }
}

/// Errors raised when opening a downstream channel through the last hop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The chain is not (or no longer) established
    #[error("Tunnel chain is not established")]
    ChainNotEstablished,

    /// The last hop could not reach the destination
    #[error("Connection to {target} refused by remote side")]
    Refused {
        /// Destination as host:port
        target: String,
    },

    /// Any other channel open failure
    #[error("Failed to open channel to {target}: {cause}")]
    Failed {
        /// Destination as host:port
        target: String,
        /// Human-readable cause
        cause: String,
    },
}

impl ChannelError {
    /// SOCKS5 reply code reported to the client for this failure
    pub fn reply_code(&self) -> u8 {
        match self {
            ChannelError::Refused { .. } => SOCKS5_REPLY_CONNECTION_REFUSED,
            ChannelError::ChainNotEstablished | ChannelError::Failed { .. } => {
                SOCKS5_REPLY_GENERAL_FAILURE
            }
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::ChainNotEstablished => ErrorCategory::Resource,
            ChannelError::Refused { .. } | ChannelError::Failed { .. } => ErrorCategory::Network,
        }
    }

    /// Equivalent IO error, keeping refusal distinguishable
    pub fn into_io_error(self) -> io::Error {
        let kind = match self {
            ChannelError::Refused { .. } => io::ErrorKind::ConnectionRefused,
            ChannelError::ChainNotEstablished => io::ErrorKind::NotConnected,
            ChannelError::Failed { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

/// A single hop that failed to close cleanly during teardown
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Failed to close hop {index} ({hop}): {cause}")]
pub struct TeardownError {
    /// Index of the hop
    pub index: usize,
    /// Hop address as host:port
    pub hop: String,
    /// Human-readable cause
    pub cause: String,
}

/// Errors surfaced by the session registry
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Another session already uses this alias
    #[error("Proxy alias already registered: {0}")]
    DuplicateAlias(String),

    /// No session uses this alias
    #[error("No proxy session found with alias: {0}")]
    UnknownAlias(String),

    /// The alias is still being opened by another caller
    #[error("Proxy alias is still being opened: {0}")]
    AliasPending(String),

    /// Port 0 is not a valid listen port
    #[error("Invalid listen port: {0}")]
    InvalidPort(u16),

    /// The listen port could not be bound on the loopback interface
    #[error("Listen port {port} is not available: {source}")]
    PortInUse {
        /// Requested port
        port: u16,
        /// Underlying bind error
        #[source]
        source: io::Error,
    },

    /// Establishing the tunnel chain failed
    #[error("Failed to establish tunnel chain: {0}")]
    Chain(#[from] ChainError),
}

impl ProxyError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProxyError::DuplicateAlias(_)
            | ProxyError::AliasPending(_)
            | ProxyError::PortInUse { .. } => ErrorCategory::Resource,
            ProxyError::UnknownAlias(_) | ProxyError::InvalidPort(_) => {
                ErrorCategory::Configuration
            }
            ProxyError::Chain(e) => e.category(),
        }
    }
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// IO error on the client socket
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// The RSV byte of a request was not zero
    #[error("Invalid reserved byte: {0:#04x}")]
    InvalidReserved(u8),

    /// Client did not finish the handshake in time
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

impl Socks5Error {
    /// Reply code to send before closing, if the protocol stage allows one
    pub fn reply_code(&self) -> Option<u8> {
        match self {
            Socks5Error::CommandNotSupported(_) => Some(SOCKS5_REPLY_COMMAND_NOT_SUPPORTED),
            Socks5Error::AddressTypeNotSupported(_) => {
                Some(SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED)
            }
            Socks5Error::InvalidDomain(_) | Socks5Error::InvalidReserved(_) => {
                Some(SOCKS5_REPLY_GENERAL_FAILURE)
            }
            _ => None,
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Socks5Error::Io(_) | Socks5Error::HandshakeTimeout => ErrorCategory::Network,
            _ => ErrorCategory::Protocol,
        }
    }
}
