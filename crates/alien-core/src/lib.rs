//! alien-core: Core types, errors and configuration for the Alien proxy
//!
//! This crate provides the domain types, the error taxonomy and the
//! configuration structures shared by the proxy daemon and its tests.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{ConfigError, ProxyError};
pub use types::{AlienUri, ConnectionId};
