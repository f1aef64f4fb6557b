//! `sleuth run`: host both periodic polls until interrupted.

use anyhow::{Context, Result};
use sleuth_core::{Supervisor, SupervisorConfig};
use tracing::info;

pub fn execute(config: &SupervisorConfig) -> Result<()> {
    if config.store.path.is_none() {
        tracing::warn!("No store path configured, jobs live only as long as this process");
    }

    let supervisor = Supervisor::from_config(config).context("Failed to build supervisor")?;
    supervisor.start().context("Failed to start supervisor")?;
    info!(
        open_jobs = supervisor.active_jobs().len(),
        "Supervising investigations, press Ctrl-C to stop"
    );

    super::block_on(async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    })?;

    info!("Interrupted, shutting down");
    supervisor.stop();
    Ok(())
}
