//! Request and connection types of the SOCKS5 server

use super::consts::*;
use std::fmt;
use std::net::SocketAddrV4;

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - open a channel to the target through the chain
    Connect,
    /// TCP BIND (rejected with 0x07)
    Bind,
    /// UDP ASSOCIATE (rejected with 0x07)
    UdpAssociate,
}

impl SocksCommand {
    /// Decode the CMD byte of a request
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Target address of a CONNECT request
///
/// Domain names are never resolved locally: they are handed to the last hop
/// as-is so that name resolution happens on the far side of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IPv4 address and port
    V4(SocketAddrV4),
    /// Unresolved domain name and port
    Domain(String, u16),
}

impl TargetAddr {
    /// Host part as it is sent in the `direct-tcpip` request
    pub fn host(&self) -> String {
        match self {
            TargetAddr::V4(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    /// Destination port
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::V4(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::V4(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Stage a client connection has reached
///
/// Connections only move forward:
/// `AwaitingGreeting -> AwaitingRequest -> Relaying -> Closed`, and may jump
/// straight to `Closed` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the method negotiation message
    AwaitingGreeting,
    /// Waiting for the CONNECT request
    AwaitingRequest,
    /// Bytes are being relayed through the chain
    Relaying,
    /// Both ends closed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::AwaitingGreeting => write!(f, "awaiting-greeting"),
            ConnectionState::AwaitingRequest => write!(f, "awaiting-request"),
            ConnectionState::Relaying => write!(f, "relaying"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
