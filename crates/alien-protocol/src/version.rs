//! CCCP protocol versions
//!
//! Three sub-versions are in the field:
//!
//! - `CCCP/0.1`: no authentication, registration completes immediately
//! - `CCCP/0.2`: challenge/response on REGISTER and RSVP, renewal by re-sending REGISTER
//! - `CCCP/0.3`: like 0.2, but renewal uses KEEPALIVE

use std::fmt;

/// Prefix shared by every version token and status line
pub const CCCP_PREFIX: &str = "CCCP/";

/// A supported CCCP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// `CCCP/0.1`
    V01,
    /// `CCCP/0.2`
    V02,
    /// `CCCP/0.3`
    V03,
}

impl ProtocolVersion {
    /// Version used for status lines before the peer has announced one
    pub const DEFAULT: ProtocolVersion = ProtocolVersion::V03;

    /// Parse an exact version token such as `CCCP/0.2`
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "CCCP/0.1" => Some(Self::V01),
            "CCCP/0.2" => Some(Self::V02),
            "CCCP/0.3" => Some(Self::V03),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V01 => "CCCP/0.1",
            Self::V02 => "CCCP/0.2",
            Self::V03 => "CCCP/0.3",
        }
    }

    /// Whether REGISTER and RSVP are authenticated with a challenge digest
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::V01)
    }

    /// Whether registrations are renewed with KEEPALIVE rather than REGISTER
    pub fn uses_keepalive(&self) -> bool {
        matches!(self, Self::V03)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
