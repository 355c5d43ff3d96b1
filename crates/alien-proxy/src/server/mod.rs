//! Accept loop and per-connection dispatch

mod classifier;
mod handler;
mod listener;

pub use classifier::{classify, HttpRequest, HttpTarget, Rejection, Request, Role};
pub use handler::ConnectionHandler;
pub use listener::ProxyServer;
