//! Periodic statistics file
//!
//! The file holds a single line,
//! `active_clients,total_clients,active_servers,total_servers`, and is
//! overwritten on every tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::{Registry, Stats};

/// Run the stats writer until `cancel` fires
pub async fn run_stats_writer(
    registry: Arc<Registry>,
    path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    tracing::info!("Starting stats writer ({:?} every {:?})", path, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = write_stats(&path, &registry.stats()).await {
                    tracing::warn!("Failed to write stats to {:?}: {}", path, e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Stats writer shutting down");
                break;
            }
        }
    }
}

/// Overwrite `path` with the current counters
pub async fn write_stats(path: &Path, stats: &Stats) -> std::io::Result<()> {
    tokio::fs::write(path, format_stats(stats)).await
}

/// Render counters as one CSV line
pub fn format_stats(stats: &Stats) -> String {
    format!(
        "{},{},{},{}\n",
        stats.active_clients, stats.total_clients, stats.active_servers, stats.total_servers
    )
}
