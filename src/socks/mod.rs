//! SOCKS5 front end for Hopsocks
//!
//! This module implements the reduced RFC1928 profile served on the local
//! loopback endpoint: no authentication, CONNECT only, IPv4 and domain
//! addresses only. Accepted requests are carried through the tunnel chain.

pub mod command;
pub mod consts;
pub mod handshake;
pub mod relay;
pub mod server;
pub mod types;

pub use command::{build_reply, parse_request, reply_bytes};
pub use handshake::negotiate_method;
pub use relay::{relay, Direction, RelayStats};
pub use server::{DownstreamOpener, ServerOptions, Socks5Server};
pub use types::{ConnectionState, SocksCommand, TargetAddr};
