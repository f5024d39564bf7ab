//! hubsync node binary.

use anyhow::Result;
use hubsync_node::{Node, NodeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting hubsync node");

    // Load configuration
    let config = NodeConfig::from_env()?;
    tracing::info!(
        store_type = %config.persistence.store_type,
        db_path = %config.persistence.db_path.display(),
        "Configuration loaded"
    );

    let node = Node::new(config)?;

    // Run node
    node.run().await?;

    Ok(())
}
