//! Message grammar for the CCCP protocol
//!
//! # Message Flow
//!
//! 1. Alien connects and sends `REGISTER <uri> <secret> <version>`
//! 2. For authenticated versions the proxy answers `CHALLENGE <nonce>`, the
//!    Alien replies `RESPONSE <digest>` and receives `CCCP/x 200 OK`
//! 3. The Alien renews periodically (`KEEPALIVE` on 0.3, `REGISTER` before)
//! 4. For each waiting client the proxy sends `INVITE <id> [<nonce>]`
//! 5. The Alien opens a new connection starting with
//!    `RSVP <uri> <id> [<digest>] <version>`, or answers `CCCP/x 503 <id>`
//!    on the control connection when it is too busy
//!
//! Proxy-originated requests carry the connection's version as their last
//! token, e.g. `INVITE 7 3f2a CCCP/0.3`.

use crate::error::ProtocolError;
use crate::invite::{InviteKey, Nonce};
use crate::version::{ProtocolVersion, CCCP_PREFIX};

/// Parameters of a `REGISTER` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Alien identity, `name@domain`
    pub uri: String,
    /// Shared secret
    pub secret: String,
    /// Protocol version the Alien speaks
    pub version: ProtocolVersion,
    /// Port advertised by legacy (`CCCP/0.1`) Aliens
    pub port: Option<u16>,
}

impl RegisterRequest {
    /// Parse the tokens following the `REGISTER` verb.
    ///
    /// Accepted forms:
    /// - `<uri> <secret> <version>`
    /// - `<uri> <secret> <port> CCCP/0.1`
    pub fn parse(params: &[&str]) -> Result<Self, ProtocolError> {
        let [uri, secret, third, rest @ ..] = params else {
            return Err(ProtocolError::bad_request(
                "400 Not enough parameters in REGISTER request",
            ));
        };

        if let Some(version) = ProtocolVersion::parse(third) {
            return Ok(Self {
                uri: uri.to_string(),
                secret: secret.to_string(),
                version,
                port: None,
            });
        }

        let port: u16 = third.parse().map_err(|_| {
            ProtocolError::bad_request(format!("400 Bad parameter in REGISTER request: {}", third))
        })?;

        let Some(version_token) = rest.first() else {
            return Err(ProtocolError::bad_request(
                "400 missing protocol version in REGISTER request",
            ));
        };

        // Only CCCP/0.1 takes a port argument
        if ProtocolVersion::parse(version_token) != Some(ProtocolVersion::V01) {
            return Err(ProtocolError::bad_request(format!(
                "400 Bad protocol version: {}",
                version_token
            )));
        }

        Ok(Self {
            uri: uri.to_string(),
            secret: secret.to_string(),
            version: ProtocolVersion::V01,
            port: Some(port),
        })
    }
}

/// Authentication carried by an `RSVP` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsvpAuth {
    /// `CCCP/0.1` rendezvous, no digest
    None,
    /// Digest over the Alien's secret and the invite nonce
    Digest(String),
}

/// Parameters of an `RSVP` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsvpRequest {
    /// Alien identity, `name@domain`
    pub uri: String,
    /// Invite being answered
    pub key: InviteKey,
    /// Challenge digest, if the version requires one
    pub auth: RsvpAuth,
    /// Protocol version announced on the rendezvous connection
    pub version: ProtocolVersion,
}

impl RsvpRequest {
    /// Parse the tokens following the `RSVP` verb.
    ///
    /// Accepted forms:
    /// - `<uri> <id> CCCP/0.1`
    /// - `<uri> <id> <digest> CCCP/0.2|CCCP/0.3`
    pub fn parse(params: &[&str]) -> Result<Self, ProtocolError> {
        let [uri, id, rest @ ..] = params else {
            return Err(ProtocolError::bad_request(
                "400 Not enough parameters in RSVP request",
            ));
        };

        let key: InviteKey = id
            .parse()
            .map_err(|_| ProtocolError::bad_request(format!("400 Bad client id {}", id)))?;

        let Some(second) = rest.first() else {
            return Err(ProtocolError::bad_request(
                "400 Missing protocol version in RSVP request",
            ));
        };

        match ProtocolVersion::parse(second) {
            Some(ProtocolVersion::V01) => {
                return Ok(Self {
                    uri: uri.to_string(),
                    key,
                    auth: RsvpAuth::None,
                    version: ProtocolVersion::V01,
                });
            }
            Some(_) => {
                return Err(ProtocolError::bad_request(
                    "400 Not enough parameters in RSVP request",
                ));
            }
            None => {}
        }

        let Some(version_token) = rest.get(1) else {
            return Err(ProtocolError::bad_request(
                "400 Missing protocol version in RSVP request",
            ));
        };

        match ProtocolVersion::parse(version_token) {
            Some(version) if version.requires_auth() => Ok(Self {
                uri: uri.to_string(),
                key,
                auth: RsvpAuth::Digest(second.to_string()),
                version,
            }),
            _ => Err(ProtocolError::bad_request(
                "400 Bad protocol version in RSVP request",
            )),
        }
    }
}

/// Returns true for the administrative form `<VERB> please CCCP/<ver>`,
/// given the tokens following the verb.
pub fn is_admin_request(params: &[&str]) -> bool {
    matches!(params, ["please", protocol] if protocol.starts_with(CCCP_PREFIX))
}

/// A line received on an established control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `KEEPALIVE ...` (CCCP/0.3 renewal)
    Keepalive,
    /// `REGISTER ...` (renewal before CCCP/0.3)
    Register(RegisterRequest),
    /// `RESPONSE <digest> ...` answering a CHALLENGE
    Response { digest: String },
    /// `CCCP/x 200 ...`
    ResponseOk,
    /// `CCCP/x 503 <id>`: the Alien declines an invite
    ResponseBusy { key: InviteKey },
}

impl ControlMessage {
    /// Parse one non-empty control line for a connection speaking `version`.
    ///
    /// Unparseable requests yield [`ProtocolError::BadRequest`] carrying the
    /// status to reply with; unusable responses yield
    /// [`ProtocolError::BadResponse`], which is logged but never answered.
    pub fn parse(line: &str, version: ProtocolVersion) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((first, rest)) = tokens.split_first() else {
            return Err(ProtocolError::bad_request("400 Empty request line"));
        };

        if first.starts_with(CCCP_PREFIX) {
            if *first != version.as_str() {
                return Err(ProtocolError::bad_response("wrong protocol version"));
            }
            return match rest {
                ["200", ..] => Ok(Self::ResponseOk),
                ["503", id, ..] => id
                    .parse()
                    .map(|key| Self::ResponseBusy { key })
                    .map_err(|_| ProtocolError::bad_response(format!("bad client id '{}'", id))),
                ["503"] | [] => Err(ProtocolError::bad_response("not enough parameters")),
                [code, ..] => Err(ProtocolError::bad_response(format!(
                    "unexpected response code {}",
                    code
                ))),
            };
        }

        if first.eq_ignore_ascii_case("KEEPALIVE") && version.uses_keepalive() {
            Ok(Self::Keepalive)
        } else if first.eq_ignore_ascii_case("REGISTER") && !version.uses_keepalive() {
            if rest.is_empty() {
                return Err(ProtocolError::bad_request("400 Not enough parameters"));
            }
            RegisterRequest::parse(rest).map(Self::Register)
        } else if first.eq_ignore_ascii_case("RESPONSE") {
            match rest.first() {
                Some(digest) => Ok(Self::Response {
                    digest: digest.to_string(),
                }),
                None => Err(ProtocolError::bad_request("400 Not enough parameters")),
            }
        } else {
            Err(ProtocolError::bad_request(format!(
                "400 Unexpected method: {}",
                first
            )))
        }
    }
}

/// A message written by the proxy onto a CCCP connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// `CHALLENGE <nonce> <version>`
    Challenge {
        nonce: Nonce,
        version: ProtocolVersion,
    },
    /// `INVITE <id> [<nonce>] <version>`
    Invite {
        key: InviteKey,
        nonce: Option<Nonce>,
        version: ProtocolVersion,
    },
    /// `<version> <status>`, e.g. `CCCP/0.3 200 OK`
    Status {
        version: ProtocolVersion,
        status: String,
    },
}

impl OutboundMessage {
    /// Build a status line
    pub fn status(version: ProtocolVersion, status: impl Into<String>) -> Self {
        Self::Status {
            version,
            status: status.into(),
        }
    }

    /// Render the message line, without terminator
    pub fn to_line(&self) -> String {
        match self {
            Self::Challenge { nonce, version } => format!("CHALLENGE {} {}", nonce, version),
            Self::Invite {
                key,
                nonce: Some(nonce),
                version,
            } => format!("INVITE {} {} {}", key, nonce, version),
            Self::Invite {
                key,
                nonce: None,
                version,
            } => format!("INVITE {} {}", key, version),
            Self::Status { version, status } => format!("{} {}", version, status),
        }
    }
}
