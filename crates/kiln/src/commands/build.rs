//! Build tasks.

use std::sync::Arc;

use anyhow::Result;
use kiln_build::{BuildTask, Pipeline, SiteConfig};

/// Run `build` or one `build:<kind>` task.
pub async fn run(config: Arc<SiteConfig>, task: BuildTask) -> Result<()> {
    let output = config.output_dir();
    let pipeline = Arc::new(Pipeline::new(config));

    let report = super::run_task(pipeline, task).await?;

    let files: usize = report.steps.iter().map(|s| s.files).sum();
    tracing::info!(
        "Built {} in {}ms ({} steps, {} files)",
        report.task,
        report.duration_ms,
        report.steps.len(),
        files
    );
    tracing::info!("Output: {}", output.display());

    Ok(())
}
