// Mailmesh - cluster-aware conversation coordinator.
//
// Entry point for one coordinator node. Loads configuration, wires the
// coordination fabric, exposes the HTTP surface, and runs until a shutdown
// signal arrives.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};

use mailmesh_api::ApiServer;
use mailmesh_core::{MeshConfig, MeshCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    let config = MeshConfig::load().await?;

    // RUST_LOG wins over the configured level when set.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(node = %config.node.node_id, "starting mailmesh");

    let coordinator = Arc::new(MeshCoordinator::new(config).await?);
    coordinator.start().await?;

    let api = ApiServer::new(Arc::clone(&coordinator));
    api.start().await?;

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping mailmesh"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }

    api.stop();
    coordinator.stop().await?;

    info!("mailmesh stopped");
    Ok(())
}
