//! Preview server and file watcher for kiln sites.
//!
//! Serves the output tree over HTTP and maps source changes to the asset
//! kind whose build task should re-run.

pub mod server;
pub mod watcher;

pub use server::{PreviewServer, PreviewServerConfig, RunningServer, ServerError};
pub use watcher::{ChangeClassifier, FileWatcher, WatchEvent};
