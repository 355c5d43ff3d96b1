//! Split, type-erased connection halves

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of an accepted connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Write half of an accepted connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// One side of a proxied session: a client connection, or the data
/// connection an Alien opened with RSVP
pub struct Endpoint {
    /// Remote address
    pub peer: SocketAddr,
    /// Read half
    pub reader: BoxedReader,
    /// Write half
    pub writer: BoxedWriter,
    /// Bytes already taken off `reader` that must be forwarded before
    /// anything else read from it
    pub pending: Bytes,
}

impl Endpoint {
    /// Create an endpoint with nothing pending
    pub fn new(peer: SocketAddr, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            peer,
            reader,
            writer,
            pending: Bytes::new(),
        }
    }

    /// Split any bidirectional stream into an endpoint
    pub fn from_stream<S>(peer: SocketAddr, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(peer, Box::new(reader), Box::new(writer))
    }

    /// Attach bytes to be forwarded first
    pub fn with_pending(mut self, pending: Bytes) -> Self {
        self.pending = pending;
        self
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("peer", &self.peer)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
