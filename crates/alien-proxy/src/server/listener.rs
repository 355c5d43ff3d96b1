//! TCP listener
//!
//! Accepts clients and Aliens on one port and spawns a handler per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

use crate::server::handler::ConnectionHandler;
use crate::state::ProxyState;

/// The proxy's accept loop
pub struct ProxyServer {
    /// Shared proxy state; its shutdown token stops the loop
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new server
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// Bind `bind_addr` and serve until shutdown
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.run_with_listener(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Proxy listening on {}", local_addr);

        let cancel = &self.state.shutdown;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Proxy listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let state = Arc::clone(&self.state);
        let cancel = self.state.shutdown.clone();

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(state, peer_addr);
            let id = handler.id();
            let (reader, writer) = socket.into_split();

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("{} cancelled", id);
                }
                _ = handler.run(Box::new(reader), Box::new(writer)) => {
                    tracing::trace!("{} closed", id);
                }
            }
        });
    }
}
