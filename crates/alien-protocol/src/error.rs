//! Protocol error types

use thiserror::Error;

/// Errors raised while framing or parsing CCCP traffic
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line exceeded the configured maximum before a newline was seen
    #[error("Line too long: more than {max} bytes without a line terminator")]
    LineTooLong { max: usize },

    /// A request line the proxy refuses, carrying the status to reply with
    /// (for example `400 Bad URI`)
    #[error("{0}")]
    BadRequest(String),

    /// A response line from an Alien that cannot be acted upon
    #[error("{0}")]
    BadResponse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn bad_request(status: impl Into<String>) -> Self {
        Self::BadRequest(status.into())
    }

    pub(crate) fn bad_response(reason: impl Into<String>) -> Self {
        Self::BadResponse(reason.into())
    }
}
