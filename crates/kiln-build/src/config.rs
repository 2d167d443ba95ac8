//! Site configuration (`kiln.toml`).
//!
//! Loaded once at startup and shared read-only by every stage. Every field
//! has a default, so an absent or empty file describes the stock two-site
//! layout (`index` and `pizza`) under `src/`, built into `dist/`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::glob::{GlobError, GlobSet};
use crate::kind::Kind;
use crate::tools::ToolCommand;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Glob(#[from] GlobError),
}

/// Complete configuration for a site.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Project directory; every other path is relative to it
    #[serde(skip)]
    pub root: PathBuf,

    pub paths: PathsConfig,
    pub css: CssConfig,
    pub js: JsConfig,
    pub images: ImagesConfig,
    pub html: HtmlConfig,
    pub tools: ToolsConfig,
    pub psi: PsiConfig,
    pub watch: WatchConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Source tree root
    pub source: PathBuf,

    /// Output tree root
    pub output: PathBuf,

    /// Pages that live in the project root rather than the source tree
    pub root_pages: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src"),
            output: PathBuf::from("dist"),
            root_pages: vec![PathBuf::from("index.html")],
        }
    }
}

/// A concatenated bundle: every fragment matching the glob, joined into `output`.
///
/// Both paths are relative to the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSpec {
    pub output: String,
    pub fragments: String,
}

impl BundleSpec {
    fn new(output: &str, fragments: &str) -> Self {
        Self {
            output: output.to_string(),
            fragments: fragments.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CssConfig {
    pub bundles: Vec<BundleSpec>,

    /// Stylesheets that get a `.min.css` sibling
    pub minify: Vec<String>,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self {
            bundles: vec![
                BundleSpec::new("index/css/main.css", "index/css/main/*.css"),
                BundleSpec::new("index/css/print.css", "index/css/print/*.css"),
                BundleSpec::new("pizza/css/main.css", "pizza/css/main/*.css"),
            ],
            minify: vec!["**/css/*.css".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsConfig {
    pub bundles: Vec<BundleSpec>,

    /// Scripts minified in place
    pub minify: Vec<String>,

    /// Emit `<script>.map` next to each minified script
    pub source_map: bool,
}

impl Default for JsConfig {
    fn default() -> Self {
        Self {
            bundles: vec![
                BundleSpec::new("pizza/js/bundle.js", "pizza/js/bundle/*.js"),
                BundleSpec::new("index/js/vendor.js", "index/js/vendor/*.js"),
            ],
            minify: vec!["**/vendor.js".to_string(), "**/bundle.js".to_string()],
            source_map: true,
        }
    }
}

/// A destructive resize of one image, relative to the output tree.
///
/// With both dimensions the result is exactly `width`×`height`; with one,
/// the other follows the original aspect ratio.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizeSpec {
    pub file: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Images recompressed in place
    pub compress: Vec<String>,

    /// Lossy encoding quality (1-100)
    pub quality: u8,

    pub resize: Vec<ResizeSpec>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            compress: vec!["**/images/*.{png,jpg}".to_string()],
            quality: 60,
            resize: vec![
                ResizeSpec {
                    file: "pizza/images/pizzeria.jpg".to_string(),
                    width: Some(360),
                    height: Some(270),
                },
                ResizeSpec {
                    file: "pizza/images/pizzeria-preview.jpg".to_string(),
                    width: Some(100),
                    height: None,
                },
            ],
        }
    }
}

/// Strip `prefix` from `src`/`href` references on the matching pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteSpec {
    pub pages: Vec<String>,
    pub prefix: String,
}

/// Inline the critical rules of `css` into every matching page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriticalSpec {
    pub css: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlConfig {
    /// Pages that get build blocks resolved and are minified
    pub pages: Vec<String>,
    pub rewrite: Vec<RewriteSpec>,
    pub critical: Vec<CriticalSpec>,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            pages: vec!["index.html".to_string(), "**/*.html".to_string()],
            rewrite: vec![RewriteSpec {
                pages: vec!["index.html".to_string()],
                prefix: "src/".to_string(),
            }],
            critical: vec![
                CriticalSpec {
                    css: "index/css/main.min.css".to_string(),
                    pages: vec!["index.html".to_string(), "index/*.html".to_string()],
                },
                CriticalSpec {
                    css: "pizza/css/main.min.css".to_string(),
                    pages: vec!["pizza/*.html".to_string()],
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub js_minify: ToolCommand,
    pub critical: ToolCommand,
    pub html_minify: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let mut js_minify = ToolCommand::new(
            "uglifyjs",
            &["{input}", "--compress", "--mangle", "--output", "{output}"],
        );
        js_minify.map_args = vec!["--source-map".to_string(), "url='{map_name}'".to_string()];

        let mut critical = ToolCommand::new(
            "critical",
            &["{input}", "--base", "{base}", "--css", "{css}", "--inline", "--minify"],
        );
        critical.stdout_to_output = true;

        let html_minify = ToolCommand::new(
            "html-minifier-terser",
            &[
                "--remove-comments",
                "--collapse-whitespace",
                "--minify-js",
                "true",
                "--output",
                "{output}",
                "{input}",
            ],
        );

        Self {
            js_minify,
            critical,
            html_minify,
        }
    }
}

/// Page-speed audit strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Desktop,
    Mobile,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Desktop => "desktop",
            Strategy::Mobile => "mobile",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PsiConfig {
    /// Local port the preview is served on and tunnelled from
    pub port: u16,
    pub locale: String,

    /// Minimum passing score (0-100)
    pub threshold: u8,
    pub strategies: Vec<Strategy>,

    /// Serve the output tree on `port` while the audit runs
    pub serve: bool,

    /// PageSpeed Insights API endpoint
    pub endpoint: String,
    pub tunnel: ToolCommand,
}

impl Default for PsiConfig {
    fn default() -> Self {
        Self {
            port: 45096,
            locale: "en_GB".to_string(),
            threshold: 90,
            strategies: vec![Strategy::Desktop, Strategy::Mobile],
            serve: true,
            endpoint: "https://www.googleapis.com/pagespeedonline/v5/runPagespeed".to_string(),
            tunnel: ToolCommand::new(
                "ngrok",
                &["http", "{port}", "--log", "stdout", "--log-format", "json"],
            ),
        }
    }
}

/// Globs, relative to the project root, that trigger a rebuild of each kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub html: Vec<String>,
    pub css: Vec<String>,
    pub js: Vec<String>,
    pub images: Vec<String>,
    pub debounce_ms: u64,
}

impl WatchConfig {
    pub fn patterns(&self, kind: Kind) -> &[String] {
        match kind {
            Kind::Html => &self.html,
            Kind::Css => &self.css,
            Kind::Js => &self.js,
            Kind::Images => &self.images,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            html: vec!["index.html".to_string(), "src/**/*.html".to_string()],
            css: vec!["src/**/css/**/*.css".to_string()],
            js: vec!["src/**/js/**/*.js".to_string()],
            images: vec!["src/**/images/*.{jpg,png}".to_string()],
            debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TasksConfig {
    /// Kinds run by `build`, in order
    pub build: Vec<Kind>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            build: Kind::ALL.to_vec(),
        }
    }
}

impl SiteConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults rooted at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if !path.exists() {
            tracing::debug!("No {} found, using defaults", path.display());
            return Ok(Self::with_root(root));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config = Self::parse(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        config.root = root;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text. The root is left empty.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no stage could act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Invalid(format!(
                "images.quality must be between 1 and 100, got {}",
                self.images.quality
            )));
        }

        for spec in &self.images.resize {
            match (spec.width, spec.height) {
                (None, None) => {
                    return Err(ConfigError::Invalid(format!(
                        "images.resize entry for {} needs a width or a height",
                        spec.file
                    )))
                }
                (Some(0), _) | (_, Some(0)) => {
                    return Err(ConfigError::Invalid(format!(
                        "images.resize entry for {} has a zero dimension",
                        spec.file
                    )))
                }
                _ => {}
            }
        }

        if self.psi.threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "psi.threshold must be at most 100, got {}",
                self.psi.threshold
            )));
        }

        if self.tasks.build.is_empty() {
            return Err(ConfigError::Invalid(
                "tasks.build must name at least one kind".to_string(),
            ));
        }

        let bundles = self.css.bundles.iter().chain(&self.js.bundles);
        for bundle in bundles {
            GlobSet::new(&[&bundle.fragments])?;
        }
        GlobSet::new(&self.css.minify)?;
        GlobSet::new(&self.js.minify)?;
        GlobSet::new(&self.images.compress)?;
        GlobSet::new(&self.html.pages)?;
        for spec in &self.html.rewrite {
            GlobSet::new(&spec.pages)?;
        }
        for spec in &self.html.critical {
            GlobSet::new(&spec.pages)?;
        }
        for kind in Kind::ALL {
            GlobSet::new(self.watch.patterns(kind))?;
        }

        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(&self.paths.source)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.paths.output)
    }

    /// Advisory lock guarding the output tree against concurrent runs.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".kiln.lock")
    }
}
