//! alien-proxy: Rendezvous reverse-proxy for Aliens behind NAT
//!
//! Aliens (embedded web servers) keep a CCCP control connection open to the
//! proxy. When an HTTP client asks for an Alien's hostname, the proxy sends
//! an INVITE over that control connection, waits for the Alien to dial back
//! with an RSVP, and then splices the two connections together.

pub mod admin;
pub mod auth;
pub mod connection;
pub mod control;
pub mod http;
pub mod invite;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
pub mod tasks;

pub use registry::Registry;
pub use state::ProxyState;
