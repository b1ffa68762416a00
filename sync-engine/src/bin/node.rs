//! Edge node binary
//!
//! Opens the local ledger and runs the sync actor against a loopback
//! in-process aggregator. Wiring a transport-backed `Aggregator`
//! implementation in place of the loopback is deployment configuration,
//! not engine logic.

use ledger_store::{Config, Ledger};
use std::error::Error;
use std::sync::Arc;
use sync_engine::{spawn_sync_client, InMemoryAggregator, SyncConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Sakti-Link edge node");

    let config = Config::from_env()?;
    let sync_config = match std::env::var("SYNC_CONFIG_PATH") {
        Ok(path) => SyncConfig::from_file(path)?,
        Err(_) => SyncConfig::default(),
    };

    let ledger = Arc::new(Ledger::open(config)?);
    tracing::info!(node_id = %ledger.node_id(), "Ledger opened");

    let aggregator = Arc::new(InMemoryAggregator::new());
    let sync = spawn_sync_client(ledger.clone(), aggregator, sync_config);

    let mut status_timer = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status_timer.tick() => {
                match sync.status().await {
                    Ok(status) => tracing::info!(
                        outbox_depth = status.outbox_depth,
                        quarantined = status.quarantined,
                        disputed_accounts = status.disputed_accounts,
                        last_sync_at = ?status.last_sync_at,
                        "Node status"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Status query failed"),
                }
            }
        }
    }

    tracing::info!("Shutting down edge node");
    sync.shutdown().await?;
    Ok(())
}
