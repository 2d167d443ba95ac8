//! In-process HTML rewrites: reference normalisation and build blocks.

use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!--\s*build:(css|js)(?:\([^)]*\))?\s+(\S+)\s*-->.*?<!--\s*endbuild\s*-->",
    )
    .expect("valid build block regex")
});

static BUILD_BLOCK_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<!--\s*build:").expect("valid build block regex"));

/// Upper bound on the compiled size of a rewrite rule.
const RULE_SIZE_LIMIT: usize = 1 << 20;

fn rule(pattern: &str) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .size_limit(RULE_SIZE_LIMIT)
        .build()
        .map_err(|e| format!("invalid rewrite rule: {}", e))
}

/// Drop `prefix` from `src` attributes of `<img>` tags and `href` attributes
/// of `<a>` tags.
///
/// Matching is case-insensitive and line-oriented: a match runs from the tag
/// opener to the end of its line, and every prefixed attribute within it is
/// rewritten. Attribute names keep their case. Already rewritten markup is
/// left as is.
pub fn rewrite_references(html: &str, prefix: &str) -> Result<String, String> {
    let prefix = regex::escape(prefix);
    // Compiled per call because the prefix is configuration.
    let rules = [
        (format!(r#"(?im)<img .*?\s?src="{}(.*)"#, prefix), "src"),
        (format!(r#"(?im)<a .*?\s?href="{}(.*)"#, prefix), "href"),
    ];

    let mut output = html.to_string();
    for (tag, attr) in rules {
        let tag = rule(&tag)?;
        let prefixed = rule(&format!(r#"(?i)\b({})="{}"#, attr, prefix))?;

        output = tag
            .replace_all(&output, |caps: &Captures| {
                prefixed.replace_all(&caps[0], r#"${1}=""#).into_owned()
            })
            .into_owned();
    }

    Ok(output)
}

/// Replace each `<!-- build:css|js target --> ... <!-- endbuild -->` block
/// with a single reference to `target`.
///
/// Fails on a block that is unclosed or of an unsupported type.
pub fn resolve_build_blocks(html: &str) -> Result<String, String> {
    let output = BUILD_BLOCK
        .replace_all(html, |caps: &Captures| {
            let target = &caps[2];
            if caps[1].eq_ignore_ascii_case("css") {
                format!(r#"<link rel="stylesheet" href="{}">"#, target)
            } else {
                format!(r#"<script src="{}"></script>"#, target)
            }
        })
        .into_owned();

    if let Some(m) = BUILD_BLOCK_OPEN.find(&output) {
        let line = output[..m.start()].matches('\n').count() + 1;
        return Err(format!(
            "unclosed or unsupported build block near line {}",
            line
        ));
    }

    Ok(output)
}
