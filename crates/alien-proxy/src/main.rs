//! Alien proxy daemon
//!
//! Accepts HTTP clients and Alien control connections on one port and
//! brokers rendezvous between them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alien_core::config::{self, ProxyConfig};
use alien_proxy::server::ProxyServer;
use alien_proxy::{tasks, ProxyState};

#[derive(Parser)]
#[command(name = "alien-proxy")]
#[command(about = "Rendezvous reverse-proxy for web servers behind NAT")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Listen on 0.0.0.0:<PORT> (overrides config and --bind)
    #[arg(short, long)]
    port: Option<u16>,

    /// Name to register with the load balancer under
    #[arg(short, long)]
    name: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Alien proxy starting...");

    // Load configuration
    let mut config: ProxyConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ProxyConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ProxyConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.bind_address = format!("0.0.0.0:{}", port);
    }
    if let Some(name) = args.name {
        config.load_balancer.name = name;
    }
    let bind_addr = config.bind_address.clone();

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let state = Arc::new(ProxyState::new(config, cancel.clone()));

    if let Some(path) = state.config.stats.path.clone() {
        tokio::spawn(tasks::run_stats_writer(
            Arc::clone(state.registry()),
            path,
            state.config.stats.period,
            cancel.clone(),
        ));
    }

    if state.config.load_balancer.enabled {
        match state.config.bind_port() {
            Some(port) => {
                tokio::spawn(tasks::run_registrar(
                    state.config.load_balancer.clone(),
                    port,
                    cancel.clone(),
                ));
            }
            None => tracing::warn!(
                "No port in bind address {}, not registering with the load balancer",
                bind_addr
            ),
        }
    }

    let server = ProxyServer::new(Arc::clone(&state));
    server.run(&bind_addr).await?;

    let dropped = state.registry.unregister_all();
    tracing::info!("Proxy shutdown complete ({} Aliens dropped)", dropped);
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    });
}
