//! Core domain types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProxyError;

/// Identity of a registered Alien, in `name@domain` form.
///
/// Clients reach an Alien through the hostname `name.domain`; the identity is
/// recovered by replacing the first `.` of the host with `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlienUri(String);

impl AlienUri {
    /// Validate and wrap an identity sent by an Alien
    pub fn parse(uri: &str) -> Result<Self, ProxyError> {
        let mut parts = uri.split('@');
        let well_formed = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(name), Some(domain), None) if !name.is_empty() && !domain.is_empty()
        );
        if !well_formed || !uri.chars().all(is_uri_char) {
            return Err(ProxyError::MalformedRequest("400 Bad URI".to_string()));
        }
        Ok(Self(uri.to_string()))
    }

    /// Recover the identity addressed by a client-visible hostname
    pub fn from_host(host: &str) -> Result<Self, ProxyError> {
        let uri = host.replacen('.', "@", 1);
        Self::parse(&uri).map_err(|_| ProxyError::UnknownHost(host.to_string()))
    }

    /// Client-visible hostname for this identity
    pub fn to_host(&self) -> String {
        self.0.replacen('@', ".", 1)
    }

    /// Get the raw identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_uri_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '"' | '<' | '>' | '\\' | '^' | '`' | '{' | '|' | '}')
}

impl fmt::Display for AlienUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identifier for an accepted connection.
///
/// Used to tell control connections apart: a 503 for an invite is only
/// honored when it arrives on the connection the invite was sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
