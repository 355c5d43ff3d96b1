//! Proxy configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the proxy daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to accept clients and Aliens on
    pub bind_address: String,

    /// Requests with this `Host:` are served by the proxy itself
    /// (liveness, listing, test) instead of being proxied
    pub public_host_name: String,

    /// Number of dot-separated labels in a client-visible Alien hostname
    pub alien_host_labels: usize,

    /// How long a client waits for an Alien to answer an INVITE
    #[serde(with = "duration_secs")]
    pub invite_timeout: Duration,

    /// Registrations not renewed within this period are dropped
    #[serde(with = "duration_secs")]
    pub registration_expiry: Duration,

    /// Header lines read while looking for `Host:`
    pub max_header_lines: usize,

    /// Longest accepted request, header or control line
    pub max_line_length: usize,

    /// Buffer size for each relay direction
    pub relay_buffer_size: usize,

    /// Request-URI prefix of the connection test endpoint
    pub test_uri: String,

    /// Statistics file
    pub stats: StatsConfig,

    /// Load balancer self-registration
    pub load_balancer: LoadBalancerConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            public_host_name: "alien.opera.com".to_string(),
            alien_host_labels: 5,
            invite_timeout: Duration::from_secs(10),
            registration_expiry: Duration::from_secs(660),
            max_header_lines: 1000,
            max_line_length: 8192,
            relay_buffer_size: 1500,
            test_uri: "/keepalive".to_string(),
            stats: StatsConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Port part of the bind address, if it has one
    pub fn bind_port(&self) -> Option<u16> {
        self.bind_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}

/// Periodic statistics file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// File overwritten with `active_clients,total_clients,active_servers,total_servers`.
    /// No file is written when unset.
    pub path: Option<PathBuf>,

    /// Interval between writes
    #[serde(with = "duration_secs")]
    pub period: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("stats")),
            period: Duration::from_secs(300),
        }
    }
}

/// Registration with an upstream load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Whether to register at all
    pub enabled: bool,

    /// Load balancer host
    pub host: String,

    /// Load balancer port; also used in links on the listing page
    pub port: u16,

    /// Interval between registrations
    #[serde(with = "duration_secs")]
    pub period: Duration,

    /// Name this proxy registers under
    pub name: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 82,
            period: Duration::from_secs(60),
            name: "alien1".to_string(),
        }
    }
}
