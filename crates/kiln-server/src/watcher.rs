//! File watching for rebuild-on-change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use kiln_build::config::WatchConfig;
use kiln_build::{GlobError, GlobSet, Kind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// A source change, tagged with the asset kind it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: Kind,
    pub path: PathBuf,
}

/// Maps changed paths to asset kinds using the watch globs.
///
/// Globs are matched against the path relative to the project root. A path
/// matching several kinds belongs to the first in build order.
#[derive(Debug, Clone)]
pub struct ChangeClassifier {
    root: PathBuf,
    rules: Vec<(Kind, GlobSet)>,
}

impl ChangeClassifier {
    pub fn new(root: &Path, config: &WatchConfig) -> Result<Self, GlobError> {
        let rules = Kind::ALL
            .into_iter()
            .map(|kind| Ok((kind, GlobSet::new(config.patterns(kind))?)))
            .collect::<Result<Vec<_>, GlobError>>()?;

        // notify reports absolute, resolved paths
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        Ok(Self { root, rules })
    }

    pub fn classify(&self, path: &Path) -> Option<Kind> {
        let relative = path.strip_prefix(&self.root).ok()?;
        self.rules
            .iter()
            .find(|(_, globs)| globs.matches(relative))
            .map(|(kind, _)| *kind)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// File watcher for detecting source changes.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `paths` recursively, forwarding classified changes.
    ///
    /// Repeated changes of the same kind within `debounce` collapse into the
    /// first one. Returns the watcher and a channel to receive events; the
    /// channel closes when the watcher is dropped.
    pub fn new(
        paths: &[PathBuf],
        classifier: ChangeClassifier,
        debounce: Duration,
    ) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
            } else {
                tracing::warn!("Not watching {}: path does not exist", path.display());
            }
        }

        std::thread::spawn(move || {
            let mut last_seen: HashMap<Kind, Instant> = HashMap::new();

            while let Ok(event) = sync_rx.recv() {
                if !is_content_change(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    let Some(kind) = classifier.classify(&path) else {
                        continue;
                    };

                    let now = Instant::now();
                    if let Some(last) = last_seen.get(&kind) {
                        if now.duration_since(*last) < debounce {
                            continue;
                        }
                    }
                    last_seen.insert(kind, now);

                    if async_tx.blocking_send(WatchEvent { kind, path }).is_err() {
                        return;
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
