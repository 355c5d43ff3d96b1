//! Core error types for the Alien proxy

use std::borrow::Cow;
use std::path::PathBuf;

use alien_protocol::ProtocolError;
use thiserror::Error;

/// Everything that can go wrong while serving a connection.
///
/// Errors are caught at the connection boundary and turned into exactly one
/// status line for the peer, in the role the connection established (HTTP
/// status line for clients, CCCP status line for Aliens).
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Nothing recognizable was sent; the connection is closed silently
    #[error("incomprehensible request ({0})")]
    NoRequest(String),

    /// Syntax error detected while classifying or parsing a request.
    /// Carries the full status, e.g. `400 Bad URI`.
    #[error("{0}")]
    MalformedRequest(String),

    /// HTTP major version below 1
    #[error("HTTP version not supported")]
    UnsupportedVersion,

    /// Host header that names neither the proxy nor an Alien
    #[error("{0} doesn't look like an Alien host")]
    UnknownHost(String),

    /// An Alien response that cannot be acted upon (wrong version, bad code,
    /// wrong-state message). Logged, never answered.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Failed challenge verification or a forged 503/RSVP
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown Alien identity or invite id. Carries the full status.
    #[error("{0}")]
    NotFound(String),

    /// The Alien declined the invite or never answered it
    #[error("busy: {0}")]
    Busy(String),

    /// Registry exhausted, wait interrupted, or similar
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status (code and reason) to send to the peer, if any
    pub fn status(&self) -> Option<Cow<'_, str>> {
        match self {
            ProxyError::NoRequest(_) | ProxyError::ProtocolViolation(_) => None,
            ProxyError::MalformedRequest(status) | ProxyError::NotFound(status) => {
                Some(Cow::Borrowed(status.as_str()))
            }
            ProxyError::UnsupportedVersion => Some(Cow::Borrowed("505 HTTP Version Not Supported")),
            ProxyError::UnknownHost(_) => Some(Cow::Borrowed("404 Not Found")),
            ProxyError::Unauthorized(_) => Some(Cow::Borrowed("401 Unauthorized")),
            ProxyError::Busy(_) => Some(Cow::Borrowed("503 Server Busy")),
            ProxyError::Internal(_) | ProxyError::Io(_) => {
                Some(Cow::Borrowed("500 Internal Server Error"))
            }
        }
    }

    /// Whether this is a benign condition (e.g. an invite that already
    /// expired) that should be logged at low severity
    pub fn is_benign(&self) -> bool {
        matches!(self, ProxyError::NotFound(_) | ProxyError::NoRequest(_))
    }
}

impl From<ProtocolError> for ProxyError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::BadRequest(status) => ProxyError::MalformedRequest(status),
            ProtocolError::BadResponse(reason) => ProxyError::ProtocolViolation(reason),
            ProtocolError::LineTooLong { max } => {
                ProxyError::MalformedRequest(format!("400 Line longer than {} bytes", max))
            }
            ProtocolError::Io(e) => ProxyError::Io(e),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
