//! Grunt-style file globs.
//!
//! Patterns are matched against paths relative to a base directory. `**`
//! crosses directory boundaries, `*` and `?` stay within a single segment,
//! `[...]` and `{a,b}` work as usual. As in Grunt, wildcards never match a
//! dot-prefixed segment; only a pattern that spells out a leading `.` can
//! reach hidden files.

use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::error::BuildError;

/// Errors produced when compiling a glob.
#[derive(Debug, thiserror::Error)]
pub enum GlobError {
    #[error(transparent)]
    Invalid(#[from] globset::Error),
}

/// A list of globs; a path matches the set if it matches any member.
#[derive(Debug, Clone)]
pub struct GlobSet {
    all: globset::GlobSet,

    /// Patterns naming a dot-prefixed segment, the only ones tried on hidden paths
    dotted: globset::GlobSet,
}

impl GlobSet {
    /// Compile every pattern in the list.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, GlobError> {
        let mut all = globset::GlobSetBuilder::new();
        let mut dotted = globset::GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern).literal_separator(true).build()?;
            if names_hidden_segment(pattern) {
                dotted.add(glob.clone());
            }
            all.add(glob);
        }

        Ok(Self {
            all: all.build()?,
            dotted: dotted.build()?,
        })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        if is_hidden(relative) {
            self.dotted.is_match(relative)
        } else {
            self.all.is_match(relative)
        }
    }

    /// Every file below `base` matching the set, in sorted walk order.
    ///
    /// A missing `base` yields no files; callers that require the directory
    /// check for it themselves. Any entry that cannot be read fails the walk.
    pub fn files_under(&self, base: &Path) -> Result<Vec<PathBuf>, BuildError> {
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(base).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(base).to_path_buf();
                BuildError::read(&path, e)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
            if self.matches(relative) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn names_hidden_segment(pattern: &str) -> bool {
    pattern
        .split('/')
        .any(|segment| segment.starts_with('.') && segment != "." && segment != "..")
}
