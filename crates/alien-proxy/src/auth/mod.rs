//! Challenge/response authentication for Aliens

mod challenge;

pub use challenge::{challenge, generate_nonce, verify};
