//! Bidirectional relay between a client and an Alien data connection

use std::fmt;
use std::io::ErrorKind;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::Endpoint;

/// Direction of a relay pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to Alien
    Upstream,
    /// Alien to client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->alien"),
            Direction::Downstream => f.write_str("alien->client"),
        }
    }
}

/// How a relay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Direction that finished first and ended the session
    pub finished: Direction,
    /// Bytes it forwarded, pending bytes included
    pub bytes: u64,
}

/// Copy bytes both ways until either direction ends, then close both
/// connections. Pending bytes on either endpoint are forwarded first.
pub async fn relay(client: Endpoint, alien: Endpoint, buffer_size: usize) -> RelayOutcome {
    let client_peer = client.peer;
    let alien_peer = alien.peer;
    let Endpoint {
        reader: mut client_reader,
        writer: mut client_writer,
        pending: client_pending,
        ..
    } = client;
    let Endpoint {
        reader: mut alien_reader,
        writer: mut alien_writer,
        pending: alien_pending,
        ..
    } = alien;

    let (finished, result) = tokio::select! {
        result = pump(Direction::Upstream, &mut client_reader, client_pending, &mut alien_writer, buffer_size) => {
            (Direction::Upstream, result)
        }
        result = pump(Direction::Downstream, &mut alien_reader, alien_pending, &mut client_writer, buffer_size) => {
            (Direction::Downstream, result)
        }
    };

    let bytes = match result {
        Ok(bytes) => {
            tracing::debug!(
                "{} finished after {} bytes ({} <-> {})",
                finished,
                bytes,
                client_peer,
                alien_peer
            );
            bytes
        }
        Err(e) => {
            tracing::debug!("{} failed: {} ({} <-> {})", finished, e, client_peer, alien_peer);
            0
        }
    };

    // Best effort: the peer may already be gone
    let _ = client_writer.shutdown().await;
    let _ = alien_writer.shutdown().await;

    RelayOutcome { finished, bytes }
}

/// Forward `pending`, then everything read from `reader`, to `writer`
async fn pump<R, W>(
    direction: Direction,
    reader: &mut R,
    pending: Bytes,
    writer: &mut W,
    buffer_size: usize,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    if !pending.is_empty() {
        writer.write_all(&pending).await?;
        writer.flush().await?;
        total += pending.len() as u64;
    }

    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                tracing::trace!("{} read returned no data ({}), retrying", direction, e);
                continue;
            }
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}
