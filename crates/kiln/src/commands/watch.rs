//! Rebuild-on-change.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_build::{BuildTask, Pipeline, SiteConfig};
use kiln_server::{ChangeClassifier, FileWatcher};

/// Run `build`, then `build:<kind>` for every change until interrupted.
///
/// Changes are handled one at a time; a failing rebuild ends the watch.
pub async fn run(config: Arc<SiteConfig>) -> Result<()> {
    let pipeline = Arc::new(Pipeline::new(config.clone()));
    super::run_task(pipeline.clone(), BuildTask::All).await?;

    let classifier = ChangeClassifier::new(&config.root, &config.watch)?;
    let root = classifier.root().to_path_buf();
    let debounce = Duration::from_millis(config.watch.debounce_ms);

    let (_watcher, mut events) = FileWatcher::new(&[root.clone()], classifier, debounce)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    tracing::info!("Watching {} for changes", root.display());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                tracing::info!("Changed: {}", event.path.display());
                super::run_task(pipeline.clone(), BuildTask::Kind(event.kind)).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watch");
                break;
            }
        }
    }

    Ok(())
}
