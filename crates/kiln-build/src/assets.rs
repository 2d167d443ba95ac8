//! Stylesheet minification.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::glob::GlobSet;

/// A minified stylesheet and its size change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinifiedAsset {
    pub source: PathBuf,
    pub output: PathBuf,
    pub original_bytes: usize,
    pub minified_bytes: usize,
}

/// Asset pipeline utilities.
pub struct AssetPipeline;

impl AssetPipeline {
    /// Minify CSS using lightningcss.
    pub fn minify_css(css: &str) -> Result<String, String> {
        use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

        let stylesheet = StyleSheet::parse(css, ParserOptions::default())
            .map_err(|e| format!("CSS parse error: {}", e))?;

        let minified = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                ..Default::default()
            })
            .map_err(|e| format!("CSS minify error: {}", e))?;

        Ok(minified.code)
    }

    /// Path of the minified sibling: `main.css` -> `main.min.css`.
    ///
    /// Everything after the first dot of the file name is replaced.
    pub fn min_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = name.split('.').next().unwrap_or(&name);
        path.with_file_name(format!("{}.min.css", stem))
    }

    /// Minify every stylesheet under `output_dir` matching `globs` into a
    /// `.min.css` sibling. Files already named `*.min.css` are skipped.
    pub fn minify_stylesheets(
        output_dir: &Path,
        globs: &GlobSet,
    ) -> Result<Vec<MinifiedAsset>, BuildError> {
        let mut minified = Vec::new();

        for source in globs.files_under(output_dir)? {
            if is_minified(&source) {
                continue;
            }

            let css = fs::read_to_string(&source).map_err(|e| BuildError::read(&source, e))?;
            let code = Self::minify_css(&css).map_err(|message| BuildError::CssError {
                path: source.display().to_string(),
                message,
            })?;

            let output = Self::min_path(&source);
            fs::write(&output, &code).map_err(|e| BuildError::write(&output, e))?;

            tracing::info!(
                "{}: {} -> {} bytes",
                output.display(),
                css.len(),
                code.len()
            );

            minified.push(MinifiedAsset {
                source,
                output,
                original_bytes: css.len(),
                minified_bytes: code.len(),
            });
        }

        Ok(minified)
    }
}

fn is_minified(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".min.css"))
        .unwrap_or(false)
}
