//! Helper utilities for Hopsocks
//!
//! Shared defaults and socket setup used by the chain and the SOCKS5 server.

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Default per-hop connect + authenticate timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default SOCKS5 handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default relay buffer size in bytes
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Listen backlog for loopback listeners
pub const LISTEN_BACKLOG: i32 = 10;

/// Keepalive applied to hop connections
const HOP_KEEPALIVE_SECS: u64 = 20;
const HOP_KEEPALIVE_INTERVAL_SECS: u64 = 8;

/// Bind a listener on `127.0.0.1:port` with SO_REUSEADDR set
///
/// Port 0 picks an ephemeral port.
pub fn bind_loopback_listener(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Apply nodelay and keepalive to a TCP connection carrying SSH
pub fn apply_hop_socket_opts(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(HOP_KEEPALIVE_SECS))
        .with_interval(Duration::from_secs(HOP_KEEPALIVE_INTERVAL_SECS));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
