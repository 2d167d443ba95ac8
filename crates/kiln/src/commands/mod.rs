//! Task implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_build::{BuildTask, Pipeline, RunReport, SiteConfig};

pub mod build;
pub mod clean;
pub mod psi;
pub mod serve;
pub mod watch;

/// Load kiln.toml, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Arc<SiteConfig>> {
    let config = SiteConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(Arc::new(config))
}

/// Run a pipeline task off the async runtime.
pub async fn run_task(pipeline: Arc<Pipeline>, task: BuildTask) -> Result<RunReport> {
    let report = tokio::task::spawn_blocking(move || pipeline.run(task))
        .await
        .context("Build task panicked")?
        .with_context(|| format!("{} failed", task))?;
    Ok(report)
}
