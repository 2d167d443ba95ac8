//! Errors raised while running the build pipeline.

use std::path::Path;

use crate::glob::GlobError;
use crate::tools::ToolError;

/// Errors that can occur during a pipeline run.
///
/// Every variant is fatal for the task that raised it.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source not found: {0}")]
    SourceMissing(String),

    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteError { path: String, message: String },

    #[error("Failed to minify CSS {path}: {message}")]
    CssError { path: String, message: String },

    #[error("Failed to process image {path}: {message}")]
    ImageError { path: String, message: String },

    #[error("Failed to transform HTML {path}: {message}")]
    HtmlError { path: String, message: String },

    #[error("Another build is already running (lock held on {0})")]
    Busy(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Glob(#[from] GlobError),
}

impl BuildError {
    pub(crate) fn read(path: &Path, err: impl ToString) -> Self {
        BuildError::ReadError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: impl ToString) -> Self {
        BuildError::WriteError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn missing(path: &Path) -> Self {
        BuildError::SourceMissing(path.display().to_string())
    }
}
