//! Asset kinds: the unit of clean, build and watch granularity.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::Deserialize;

/// One of the four asset kinds handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Html,
    Css,
    Js,
    Images,
}

impl Kind {
    /// All kinds in their declaration order.
    pub const ALL: [Kind; 4] = [Kind::Html, Kind::Css, Kind::Js, Kind::Images];

    /// Lowercase name, as used in task names (`build:<name>`).
    pub fn name(self) -> &'static str {
        match self {
            Kind::Html => "html",
            Kind::Css => "css",
            Kind::Js => "js",
            Kind::Images => "images",
        }
    }

    /// Directory name that groups files of this kind, if the kind is
    /// directory-scoped. HTML pages are recognised by extension instead.
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            Kind::Html => None,
            Kind::Css => Some("css"),
            Kind::Js => Some("js"),
            Kind::Images => Some("images"),
        }
    }

    /// Whether a path relative to the source or output root belongs to this kind.
    ///
    /// `css/js/images` own every file below a directory of that name;
    /// `html` owns every `*.html` file.
    pub fn owns(self, relative: &Path) -> bool {
        match self.dir_name() {
            Some(dir) => relative
                .parent()
                .map(|parent| {
                    parent
                        .components()
                        .any(|c| matches!(c, Component::Normal(name) if name == dir))
                })
                .unwrap_or(false),
            None => relative
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("html"))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(Kind::Html),
            "css" => Ok(Kind::Css),
            "js" => Ok(Kind::Js),
            "images" => Ok(Kind::Images),
            other => Err(format!("unknown asset kind: {}", other)),
        }
    }
}

/// What a clean step removes from the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    /// The whole output tree
    All,
    /// Only the files of one kind
    Kind(Kind),
}

impl fmt::Display for CleanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanTarget::All => f.write_str("all"),
            CleanTarget::Kind(kind) => kind.fmt(f),
        }
    }
}
