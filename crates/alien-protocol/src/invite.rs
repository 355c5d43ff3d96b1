//! Invite keys and nonces

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifies one outstanding INVITE, and with it the client waiting on it.
///
/// Keys are unique among live invites only; they are recycled once an
/// invite resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InviteKey(pub u32);

impl InviteKey {
    /// Largest key handed out (keys are positive 31-bit integers)
    pub const MAX: u32 = i32::MAX as u32;

    /// Create a new invite key
    pub fn new(key: u32) -> Self {
        Self(key)
    }

    /// Get the raw key value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for InviteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InviteKey {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// One-time random value bound to a registration attempt or an invite.
///
/// Rendered on the wire in lowercase radix 16 without leading zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce(pub u128);

impl Nonce {
    /// Get the raw value
    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for Nonce {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
    }
}
