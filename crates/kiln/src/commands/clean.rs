//! Output tree removal.

use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_build::{Pipeline, SiteConfig};

pub async fn run(config: Arc<SiteConfig>) -> Result<()> {
    let output = config.output_dir();
    let pipeline = Pipeline::new(config);

    let removed = tokio::task::spawn_blocking(move || pipeline.clean_all())
        .await
        .context("Clean task panicked")??;

    if removed == 0 {
        tracing::info!("Nothing to clean");
    } else {
        tracing::info!("Removed {}", output.display());
    }

    Ok(())
}
