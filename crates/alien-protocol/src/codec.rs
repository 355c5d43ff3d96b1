//! Tokio codec for CRLF-terminated protocol lines
//!
//! The same codec reads the first lines of every accepted connection, before
//! it is known whether the peer speaks HTTP or CCCP. While a connection is
//! still being classified the codec can keep a transcript of every byte it
//! consumed, so that an HTTP request can be replayed verbatim to the Alien
//! that ends up serving it.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::OutboundMessage;
use crate::CRLF;

/// Default upper bound on a single line
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// Codec splitting a byte stream into lines and writing CCCP messages
#[derive(Debug)]
pub struct LineCodec {
    /// Maximum accepted line length, terminator excluded
    max_length: usize,
    /// Offset up to which the buffer has already been searched for '\n'
    next_index: usize,
    /// Raw bytes of every decoded line, when recording
    transcript: Option<BytesMut>,
}

impl LineCodec {
    /// Create a new codec
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            transcript: None,
        }
    }

    /// Create a codec that records the raw bytes of each decoded line
    pub fn recording(max_length: usize) -> Self {
        Self {
            transcript: Some(BytesMut::new()),
            ..Self::new(max_length)
        }
    }

    /// Stop recording and discard anything recorded so far
    pub fn stop_recording(&mut self) {
        self.transcript = None;
    }

    /// Take the recorded bytes, leaving recording disabled
    pub fn take_transcript(&mut self) -> BytesMut {
        self.transcript.take().unwrap_or_default()
    }

    fn emit(&mut self, raw: BytesMut) -> String {
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.extend_from_slice(&raw);
        }
        let mut line = &raw[..];
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let search_end = src.len().min(self.max_length + 2);
        let newline = src[self.next_index..search_end]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.next_index + offset);

        match newline {
            Some(index) => {
                self.next_index = 0;
                let raw = src.split_to(index + 1);
                Ok(Some(self.emit(raw)))
            }
            None if src.len() > self.max_length + 1 => {
                tracing::debug!("line exceeds {} bytes, {} buffered", self.max_length, src.len());
                Err(ProtocolError::LineTooLong {
                    max: self.max_length,
                })
            }
            None => {
                // Need more data
                self.next_index = search_end;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated final line
        tracing::trace!("unterminated line of {} bytes at end of stream", src.len());
        self.next_index = 0;
        let raw = src.split_to(src.len());
        Ok(Some(self.emit(raw)))
    }
}

impl Encoder<OutboundMessage> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: OutboundMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = message.to_line();
        dst.reserve(line.len() + 2 * CRLF.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(CRLF.as_bytes());
        // An empty line terminates every CCCP message
        dst.put_slice(CRLF.as_bytes());
        Ok(())
    }
}
