//! Line-oriented reading with replay of consumed bytes

use alien_protocol::{LineCodec, ProtocolError};
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::codec::FramedRead;

use super::BoxedReader;

/// Reads CRLF lines off a fresh connection.
///
/// Every byte taken off the socket stays recoverable: the codec records the
/// raw lines it decoded, and whatever was read ahead sits in the frame
/// buffer. Whoever takes over the connection gets those bytes back through
/// [`LineReader::into_replay`] or [`LineReader::into_remainder`].
pub struct LineReader {
    frames: FramedRead<BoxedReader, LineCodec>,
}

impl LineReader {
    /// Start reading `reader`, recording decoded lines
    pub fn new(reader: BoxedReader, max_line_length: usize) -> Self {
        Self {
            frames: FramedRead::new(reader, LineCodec::recording(max_line_length)),
        }
    }

    /// Next line without its terminator, or `None` at end of stream
    pub async fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        self.frames.next().await.transpose()
    }

    /// Stop recording decoded lines (long-lived control connections)
    pub fn stop_recording(&mut self) {
        self.frames.decoder_mut().stop_recording();
    }

    /// Give back the reader together with every byte read from it so far:
    /// the recorded lines followed by the read-ahead
    pub fn into_replay(self) -> (BoxedReader, Bytes) {
        let mut parts = self.frames.into_parts();
        let mut replay = parts.codec.take_transcript();
        replay.extend_from_slice(&parts.read_buf);
        (parts.io, replay.freeze())
    }

    /// Give back the reader together with the read-ahead only
    pub fn into_remainder(self) -> (BoxedReader, Bytes) {
        let parts = self.frames.into_parts();
        (parts.io, parts.read_buf.freeze())
    }
}
