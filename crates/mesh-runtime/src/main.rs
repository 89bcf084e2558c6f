//! # Event Mesh Runtime
//!
//! Entry point for one mesh process.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize logging, tracing and metrics
//! 3. Register message contracts and build the dispatcher
//! 4. Start the dispatcher and the generator loop
//! 5. Run until Ctrl+C, then drain and exit

use anyhow::{Context, Result};
use mesh_runtime::{MeshRuntime, RuntimeConfig};
use mesh_telemetry::init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env();

    let _telemetry = init_telemetry(config.telemetry.clone())
        .await
        .context("Failed to initialize telemetry")?;

    let runtime = MeshRuntime::new(config)?;
    runtime.start().await?;

    info!("Runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    runtime.shutdown().await
}
