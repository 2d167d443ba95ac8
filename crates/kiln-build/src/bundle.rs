//! Bundle concatenation.
//!
//! Fragments are joined in sorted enumeration order with a newline between
//! them. Stylesheets lose every block comment; scripts lose their leading
//! banner (block or line comments) only, since comment-like text inside
//! string and regex literals cannot be told apart without a parser.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::BundleSpec;
use crate::error::BuildError;
use crate::glob::GlobSet;
use crate::kind::Kind;

static BLOCK_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*/\*[\s\S]*?\*/\s*").expect("valid banner regex"));

static LINE_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?://[^\n]*\n\s*)+").expect("valid banner regex"));

/// Remove every `/* ... */` comment, leaving quoted strings intact.
pub fn strip_block_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Remove a leading banner: block comments first, then `//` lines.
pub fn strip_banner(source: &str) -> String {
    let without_block = BLOCK_BANNER.replace(source, "");
    LINE_BANNER.replace(&without_block, "").into_owned()
}

/// Prepare one fragment for joining.
fn clean_fragment(source: &str, kind: Kind) -> String {
    let stripped = match kind {
        Kind::Css => strip_block_comments(source),
        _ => strip_banner(source),
    };
    stripped.trim().to_string()
}

/// Join fragment sources in the given order.
pub fn join_fragments<S: AsRef<str>>(fragments: &[S], kind: Kind) -> String {
    fragments
        .iter()
        .map(|f| clean_fragment(f.as_ref(), kind))
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build one bundle inside the output tree.
///
/// Returns the bundle path, or `None` when no fragment matched.
pub fn concat_bundle(
    output_dir: &Path,
    spec: &BundleSpec,
    kind: Kind,
) -> Result<Option<PathBuf>, BuildError> {
    let fragments = GlobSet::new(&[&spec.fragments])?.files_under(output_dir)?;
    let target = output_dir.join(&spec.output);

    if fragments.is_empty() {
        tracing::warn!(
            "No fragments match {}; {} not written",
            spec.fragments,
            spec.output
        );
        return Ok(None);
    }

    let sources = fragments
        .iter()
        .map(|path| fs::read_to_string(path).map_err(|e| BuildError::read(path, e)))
        .collect::<Result<Vec<_>, _>>()?;

    let bundle = join_fragments(&sources, kind);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::write(parent, e))?;
    }
    fs::write(&target, bundle).map_err(|e| BuildError::write(&target, e))?;

    tracing::debug!(
        "Concatenated {} fragments into {}",
        fragments.len(),
        target.display()
    );

    Ok(Some(target))
}
