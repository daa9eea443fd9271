//! Bidirectional relay between a SOCKS5 client and a chain channel
//!
//! Two copy loops run concurrently. The first one to stop (EOF or error)
//! ends the relay, and both streams are dropped so the peer of the other
//! loop observes the close as well.

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Direction of a copy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local client to the remote channel
    ClientToRemote,
    /// Remote channel to the local client
    RemoteToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRemote => write!(f, "client->remote"),
            Direction::RemoteToClient => write!(f, "remote->client"),
        }
    }
}

/// Summary of a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes written to the remote channel
    pub client_to_remote: u64,
    /// Bytes written to the client socket
    pub remote_to_client: u64,
    /// The copy loop that stopped first
    pub finished_by: Direction,
}

/// Relay data between `client` and `remote` until either side stops
///
/// Errors such as a reset by peer are ordinary termination and are only
/// logged; the returned stats describe what was transferred.
pub async fn relay<A, B>(client: A, remote: B, buffer_size: usize) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let buffer_size = buffer_size.max(1);
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let mut up = 0u64;
    let mut down = 0u64;

    let (finished_by, result) = tokio::select! {
        result = pump(&mut client_read, &mut remote_write, buffer_size, &mut up) => {
            (Direction::ClientToRemote, result)
        }
        result = pump(&mut remote_read, &mut client_write, buffer_size, &mut down) => {
            (Direction::RemoteToClient, result)
        }
    };

    match result {
        Ok(()) => debug!("{} reached EOF", finished_by),
        Err(e) => debug!("{} stopped: {}", finished_by, e),
    }

    drop((client_read, client_write, remote_read, remote_write));

    RelayStats {
        client_to_remote: up,
        remote_to_client: down,
        finished_by,
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}
