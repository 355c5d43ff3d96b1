//! Keyed digests binding an Alien's shared secret to a one-time nonce
//!
//! The digest is MD5 over the UTF-8 secret followed by the nonce's
//! lowercase radix-16 text (as sent on the wire), rendered as 32 lowercase
//! hex digits. Existing Aliens compute exactly this.

use alien_protocol::Nonce;
use md5::{Digest, Md5};

/// Compute the digest an Alien must answer `nonce` with
pub fn challenge(secret: &str, nonce: Nonce) -> String {
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a digest received from an Alien, ignoring hex case
pub fn verify(candidate: &str, secret: &str, nonce: Nonce) -> bool {
    candidate.eq_ignore_ascii_case(&challenge(secret, nonce))
}

/// Draw a fresh 128-bit nonce
pub fn generate_nonce() -> Nonce {
    Nonce(rand::random::<u128>())
}
