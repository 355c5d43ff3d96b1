//! alien-protocol: the CCCP control-channel protocol
//!
//! CCCP is a CRLF-terminated text protocol. Every message is a single line
//! followed by an empty line. Aliens register over a long-lived control
//! connection, receive `INVITE`s on it, and answer them by opening a fresh
//! connection that starts with an `RSVP` line.

pub mod codec;
pub mod error;
pub mod invite;
pub mod message;
pub mod version;

pub use codec::LineCodec;
pub use error::ProtocolError;
pub use invite::{InviteKey, Nonce};
pub use message::{ControlMessage, OutboundMessage, RegisterRequest, RsvpAuth, RsvpRequest};
pub use version::ProtocolVersion;

/// Line terminator used on the wire
pub const CRLF: &str = "\r\n";
