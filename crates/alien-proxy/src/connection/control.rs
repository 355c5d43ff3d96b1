//! Write side of an Alien's control connection

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use alien_core::ConnectionId;
use alien_protocol::{LineCodec, OutboundMessage, ProtocolError};
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use super::BoxedWriter;

/// Longest a single message may take to reach the socket, lock wait
/// included. An Alien that stops reading for this long is closed.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to a control connection.
///
/// The registry stores one per registered Alien; invites and the control
/// loop's own replies go through [`ControlChannel::send`], which holds the
/// write lock for a whole message so concurrent senders never interleave.
pub struct ControlChannel {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<FramedWrite<BoxedWriter, LineCodec>>,
    cancel: CancellationToken,
}

impl ControlChannel {
    /// Wrap the write half of a control connection
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        writer: BoxedWriter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            writer: Mutex::new(FramedWrite::new(writer, LineCodec::default())),
            cancel,
        }
    }

    /// Connection this channel writes to
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the Alien
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one message, terminating blank line included.
    ///
    /// Fails with `TimedOut` and closes the channel if the message is not
    /// written within [`WRITE_TIMEOUT`].
    pub async fn send(&self, message: OutboundMessage) -> Result<(), ProtocolError> {
        tracing::trace!("{} <- {}", self.id, message.to_line());
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(message).await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => {
                tracing::info!("{} stalled writing to {}, closing", self.id, self.peer);
                self.close();
                Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "control connection write timed out",
                )))
            }
        }
    }

    /// Ask the control loop owning this connection to stop
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`ControlChannel::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled by [`ControlChannel::close`]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Flush and shut down the write half, giving up after [`WRITE_TIMEOUT`]
    pub async fn shutdown(&self) {
        let close = async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::trace!("{} shutdown: {}", self.id, e),
            Err(_) => tracing::debug!("{} shutdown timed out", self.id),
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
