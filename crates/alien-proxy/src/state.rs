//! Global proxy state

use std::sync::Arc;

use alien_core::config::ProxyConfig;
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

/// State shared by every connection task
pub struct ProxyState {
    /// Configuration
    pub config: ProxyConfig,
    /// Aliens and waiting clients
    pub registry: Arc<Registry>,
    /// Cancelled on Ctrl-C, SIGTERM or `SHUTDOWN please`
    pub shutdown: CancellationToken,
}

impl ProxyState {
    /// Create new proxy state with an empty registry
    pub fn new(config: ProxyConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(Registry::new(config.registration_expiry));
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Get the registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
