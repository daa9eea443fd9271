//! SOCKS5 reply builder
//!
//! Constructs SOCKS5 reply messages. The proxy is a tunnel, not a literal
//! bind, so the bound address is always reported as `0.0.0.0:0`.

use crate::socks::consts::*;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Reply bytes for the given status code
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn reply_bytes(reply_code: u8) -> [u8; 10] {
    [
        SOCKS5_VERSION,
        reply_code,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ]
}

/// Build and send a SOCKS5 reply
pub async fn build_reply<S>(stream: &mut S, reply_code: u8) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&reply_bytes(reply_code)).await?;
    stream.flush().await
}
