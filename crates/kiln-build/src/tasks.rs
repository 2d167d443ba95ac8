//! Task sequencer.
//!
//! Each kind has a fixed, ordered list of steps. A run executes the steps
//! one at a time, each finishing every file before the next starts, and
//! stops at the first failure. Runs always begin with a clean, so a failed
//! task is recovered by running it again.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;

use crate::assets::AssetPipeline;
use crate::bundle::concat_bundle;
use crate::config::{BundleSpec, SiteConfig};
use crate::error::BuildError;
use crate::glob::GlobSet;
use crate::html::{resolve_build_blocks, rewrite_references};
use crate::images;
use crate::kind::{CleanTarget, Kind};
use crate::stage::Stager;
use crate::tools::{CommandToolchain, Toolchain};

/// One operation in a kind's step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clean(Kind),
    Stage(Kind),
    RewriteReferences,
    ResolveBuildBlocks,
    InlineCritical,
    MinifyHtml,
    ConcatCss,
    MinifyCss,
    ConcatJs,
    MinifyJs,
    CompressImages,
    ResizeImages,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Clean(kind) => write!(f, "clean:{}", kind),
            Step::Stage(kind) => write!(f, "stage:{}", kind),
            Step::RewriteReferences => f.write_str("rewrite:html"),
            Step::ResolveBuildBlocks => f.write_str("usemin:html"),
            Step::InlineCritical => f.write_str("critical:html"),
            Step::MinifyHtml => f.write_str("minify:html"),
            Step::ConcatCss => f.write_str("concat:css"),
            Step::MinifyCss => f.write_str("minify:css"),
            Step::ConcatJs => f.write_str("concat:js"),
            Step::MinifyJs => f.write_str("minify:js"),
            Step::CompressImages => f.write_str("compress:images"),
            Step::ResizeImages => f.write_str("resize:images"),
        }
    }
}

const HTML_STEPS: [Step; 6] = [
    Step::Clean(Kind::Html),
    Step::Stage(Kind::Html),
    Step::RewriteReferences,
    Step::ResolveBuildBlocks,
    Step::InlineCritical,
    Step::MinifyHtml,
];

const CSS_STEPS: [Step; 4] = [
    Step::Clean(Kind::Css),
    Step::Stage(Kind::Css),
    Step::ConcatCss,
    Step::MinifyCss,
];

const JS_STEPS: [Step; 4] = [
    Step::Clean(Kind::Js),
    Step::Stage(Kind::Js),
    Step::ConcatJs,
    Step::MinifyJs,
];

const IMAGE_STEPS: [Step; 4] = [
    Step::Clean(Kind::Images),
    Step::Stage(Kind::Images),
    Step::CompressImages,
    Step::ResizeImages,
];

/// The ordered steps of `build:<kind>`.
pub fn steps(kind: Kind) -> &'static [Step] {
    match kind {
        Kind::Html => &HTML_STEPS,
        Kind::Css => &CSS_STEPS,
        Kind::Js => &JS_STEPS,
        Kind::Images => &IMAGE_STEPS,
    }
}

/// A runnable build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTask {
    /// `build`: every kind, in the configured order
    All,
    /// `build:<kind>`
    Kind(Kind),
}

impl fmt::Display for BuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTask::All => f.write_str("build"),
            BuildTask::Kind(kind) => write!(f, "build:{}", kind),
        }
    }
}

impl FromStr for BuildTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" | "default" => Ok(BuildTask::All),
            other => match other.strip_prefix("build:") {
                Some(kind) => kind.parse().map(BuildTask::Kind),
                None => Err(format!("unknown build task: {}", other)),
            },
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,

    /// Files (or directories, for clean) touched
    pub files: usize,

    pub duration_ms: u64,
}

/// Outcome of a task run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: BuildTask,
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

impl RunReport {
    /// The steps that ran, in order.
    pub fn step_sequence(&self) -> Vec<Step> {
        self.steps.iter().map(|s| s.step).collect()
    }
}

/// Exclusive hold on the output tree for the duration of a run.
struct RunLock {
    file: File,
}

impl RunLock {
    fn acquire(path: &Path) -> Result<Self, BuildError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::write(parent, e))?;
        }

        let file = File::create(path).map_err(|e| BuildError::write(path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| BuildError::Busy(path.display().to_string()))?;

        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Runs build tasks against one site.
pub struct Pipeline {
    config: Arc<SiteConfig>,
    toolchain: Arc<dyn Toolchain>,
}

impl Pipeline {
    /// Create a pipeline that shells out to the configured tools.
    pub fn new(config: Arc<SiteConfig>) -> Self {
        let toolchain = Arc::new(CommandToolchain::new(config.tools.clone()));
        Self { config, toolchain }
    }

    /// Create a pipeline with a custom toolchain.
    pub fn with_toolchain(config: Arc<SiteConfig>, toolchain: Arc<dyn Toolchain>) -> Self {
        Self { config, toolchain }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Run a task to completion, stopping at the first failing step.
    pub fn run(&self, task: BuildTask) -> Result<RunReport, BuildError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        let start = Instant::now();

        let kinds = match task {
            BuildTask::All => self.config.tasks.build.clone(),
            BuildTask::Kind(kind) => vec![kind],
        };

        tracing::info!("Running {}", task);

        let mut reports = Vec::new();
        for kind in kinds {
            for &step in steps(kind) {
                reports.push(self.timed(step)?);
            }
        }

        let report = RunReport {
            task,
            steps: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Finished {}: {} steps in {}ms",
            task,
            report.steps.len(),
            report.duration_ms
        );

        Ok(report)
    }

    /// Remove the whole output tree.
    pub fn clean_all(&self) -> Result<usize, BuildError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        Stager::new(&self.config).clean(CleanTarget::All)
    }

    fn timed(&self, step: Step) -> Result<StepReport, BuildError> {
        let start = Instant::now();

        let files = self.run_step(step).inspect_err(|e| {
            tracing::error!("{} failed: {}", step, e);
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!("{} ({} files, {}ms)", step, files, duration_ms);

        Ok(StepReport {
            step,
            files,
            duration_ms,
        })
    }

    fn run_step(&self, step: Step) -> Result<usize, BuildError> {
        let config = &self.config;
        let output = config.output_dir();

        match step {
            Step::Clean(kind) => Stager::new(config).clean(CleanTarget::Kind(kind)),
            Step::Stage(kind) => Stager::new(config).stage(kind),

            Step::ConcatCss => concat_all(&output, &config.css.bundles, Kind::Css),
            Step::ConcatJs => concat_all(&output, &config.js.bundles, Kind::Js),

            Step::MinifyCss => {
                let globs = GlobSet::new(&config.css.minify)?;
                Ok(AssetPipeline::minify_stylesheets(&output, &globs)?.len())
            }

            Step::MinifyJs => {
                let scripts = GlobSet::new(&config.js.minify)?.files_under(&output)?;
                for script in &scripts {
                    let map = config.js.source_map.then(|| {
                        let mut name = script.as_os_str().to_owned();
                        name.push(".map");
                        PathBuf::from(name)
                    });
                    self.toolchain.minify_js(script, map.as_deref())?;
                }
                Ok(scripts.len())
            }

            Step::CompressImages => {
                let globs = GlobSet::new(&config.images.compress)?;
                images::compress(&output, &globs, config.images.quality)
            }

            Step::ResizeImages => {
                for spec in &config.images.resize {
                    images::resize(&output, spec, config.images.quality)?;
                }
                Ok(config.images.resize.len())
            }

            Step::RewriteReferences => {
                let mut count = 0;
                for spec in &config.html.rewrite {
                    for page in GlobSet::new(&spec.pages)?.files_under(&output)? {
                        if rewrite_page(&page, |html| rewrite_references(html, &spec.prefix))? {
                            count += 1;
                        }
                    }
                }
                Ok(count)
            }

            Step::ResolveBuildBlocks => {
                let mut count = 0;
                for page in GlobSet::new(&config.html.pages)?.files_under(&output)? {
                    if rewrite_page(&page, resolve_build_blocks)? {
                        count += 1;
                    }
                }
                Ok(count)
            }

            Step::InlineCritical => {
                let mut count = 0;
                for spec in &config.html.critical {
                    let stylesheet = output.join(&spec.css);
                    for page in GlobSet::new(&spec.pages)?.files_under(&output)? {
                        self.toolchain.inline_critical(&page, &stylesheet, &output)?;
                        count += 1;
                    }
                }
                Ok(count)
            }

            Step::MinifyHtml => {
                let pages = GlobSet::new(&config.html.pages)?.files_under(&output)?;
                for page in &pages {
                    self.toolchain.minify_html(page)?;
                }
                Ok(pages.len())
            }
        }
    }
}

fn concat_all(
    output: &Path,
    bundles: &[BundleSpec],
    kind: Kind,
) -> Result<usize, BuildError> {
    let mut written = 0;
    for spec in bundles {
        if concat_bundle(output, spec, kind)?.is_some() {
            written += 1;
        }
    }
    Ok(written)
}

/// Apply an in-place text transform to a page; returns whether it changed.
fn rewrite_page<F>(page: &Path, transform: F) -> Result<bool, BuildError>
where
    F: FnOnce(&str) -> Result<String, String>,
{
    let html = fs::read_to_string(page).map_err(|e| BuildError::read(page, e))?;
    let rewritten = transform(&html).map_err(|message| BuildError::HtmlError {
        path: page.display().to_string(),
        message,
    })?;

    if rewritten == html {
        return Ok(false);
    }

    fs::write(page, rewritten).map_err(|e| BuildError::write(page, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::{RecordedOp, RecordingToolchain};
    use image::{ImageEncoder, RgbImage};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        });
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 95)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        bytes
    }

    /// A two-site source tree shaped like the stock configuration.
    fn fixture() -> tempfile::TempDir {
        let temp = tempdir().unwrap();
        let root = temp.path();

        write(
            &root.join("index.html"),
            br#"<html><head>
<!-- build:css /index/css/main.min.css -->
<link rel="stylesheet" href="/index/css/main/a.css">
<!-- endbuild -->
</head><body><a href="src/pizza/pizza.html"><img src="src/pizza/images/pizzeria.jpg"></a></body></html>"#,
        );
        write(
            &root.join("src/pizza/pizza.html"),
            b"<html><body><!-- build:js js/bundle.js --><script src=\"js/bundle/a.js\"></script><!-- endbuild --></body></html>",
        );
        write(&root.join("src/index/css/main/a.css"), b"/* banner */ .x{color:red}");
        write(&root.join("src/index/css/main/b.css"), b".y{color:blue}");
        write(&root.join("src/index/css/print/print.css"), b"body{margin:0}");
        write(&root.join("src/pizza/css/main/pizza.css"), b".p { padding: 1px; }");
        write(&root.join("src/pizza/js/bundle/a.js"), b"// banner\nvar a = 1;");
        write(&root.join("src/pizza/js/bundle/b.js"), b"var b = 2;");
        write(&root.join("src/index/js/vendor/v.js"), b"var v;");
        write(&root.join("src/pizza/images/pizzeria.jpg"), &jpeg(480, 320));
        write(&root.join("src/pizza/images/pizzeria-preview.jpg"), &jpeg(400, 300));
        write(&root.join("src/index/images/me.jpg"), &jpeg(32, 32));

        temp
    }

    fn pipeline(root: &Path) -> (Pipeline, Arc<RecordingToolchain>) {
        let toolchain = Arc::new(RecordingToolchain::new());
        let pipeline = Pipeline::with_toolchain(
            Arc::new(SiteConfig::with_root(root)),
            Arc::clone(&toolchain) as Arc<dyn Toolchain>,
        );
        (pipeline, toolchain)
    }

    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                (
                    e.path().strip_prefix(dir).unwrap().to_path_buf(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn step_tables_follow_declared_order() {
        assert_eq!(
            steps(Kind::Html),
            &[
                Step::Clean(Kind::Html),
                Step::Stage(Kind::Html),
                Step::RewriteReferences,
                Step::ResolveBuildBlocks,
                Step::InlineCritical,
                Step::MinifyHtml,
            ]
        );
        assert_eq!(&steps(Kind::Images)[2..], &[Step::CompressImages, Step::ResizeImages]);
        for kind in Kind::ALL {
            assert_eq!(steps(kind)[0], Step::Clean(kind));
            assert_eq!(steps(kind)[1], Step::Stage(kind));
        }
    }

    #[test]
    fn parses_task_names() {
        assert_eq!("build".parse::<BuildTask>().unwrap(), BuildTask::All);
        assert_eq!("default".parse::<BuildTask>().unwrap(), BuildTask::All);
        assert_eq!(
            "build:images".parse::<BuildTask>().unwrap(),
            BuildTask::Kind(Kind::Images)
        );
        assert!("build:fonts".parse::<BuildTask>().is_err());
        assert!("psi".parse::<BuildTask>().is_err());
        assert_eq!(BuildTask::Kind(Kind::Css).to_string(), "build:css");
    }

    #[test]
    fn build_runs_kinds_sequentially_in_configured_order() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());

        let report = pipeline.run(BuildTask::All).unwrap();

        let expected: Vec<Step> = Kind::ALL
            .iter()
            .flat_map(|&k| steps(k).iter().copied())
            .collect();
        assert_eq!(report.step_sequence(), expected);
    }

    #[test]
    fn css_build_produces_bundles_and_min_files() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        pipeline.run(BuildTask::Kind(Kind::Css)).unwrap();

        assert_eq!(
            fs::read_to_string(dist.join("index/css/main.css")).unwrap(),
            ".x{color:red}\n.y{color:blue}"
        );
        let min = fs::read_to_string(dist.join("index/css/main.min.css")).unwrap();
        assert!(min.contains(".x{color:red}"));
        assert!(min.contains(".y{"));
        assert!(dist.join("index/css/print.min.css").exists());
        assert!(dist.join("pizza/css/main.min.css").exists());
    }

    #[test]
    fn js_build_minifies_bundles_with_source_maps() {
        let temp = fixture();
        let (pipeline, toolchain) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        pipeline.run(BuildTask::Kind(Kind::Js)).unwrap();

        assert_eq!(
            fs::read_to_string(dist.join("pizza/js/bundle.js")).unwrap(),
            "var a = 1;\nvar b = 2;"
        );
        assert_eq!(
            toolchain.get_operations(),
            vec![
                RecordedOp::MinifyJs {
                    file: dist.join("index/js/vendor.js"),
                    source_map: Some(dist.join("index/js/vendor.js.map")),
                },
                RecordedOp::MinifyJs {
                    file: dist.join("pizza/js/bundle.js"),
                    source_map: Some(dist.join("pizza/js/bundle.js.map")),
                },
            ]
        );
    }

    #[test]
    fn html_build_rewrites_then_inlines_then_minifies() {
        let temp = fixture();
        let (pipeline, toolchain) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        pipeline.run(BuildTask::Kind(Kind::Html)).unwrap();

        let index = fs::read_to_string(dist.join("index.html")).unwrap();
        assert!(index.contains(r#"<link rel="stylesheet" href="/index/css/main.min.css">"#));
        assert!(index.contains(r#"href="pizza/pizza.html""#));
        assert!(index.contains(r#"src="pizza/images/pizzeria.jpg""#));
        assert!(!index.contains("build:css"));

        let pizza = fs::read_to_string(dist.join("pizza/pizza.html")).unwrap();
        assert!(pizza.contains(r#"<script src="js/bundle.js"></script>"#));

        let ops = toolchain.get_operations();
        assert_eq!(
            &ops[..2],
            &[
                RecordedOp::InlineCritical {
                    page: dist.join("index.html"),
                    stylesheet: dist.join("index/css/main.min.css"),
                },
                RecordedOp::InlineCritical {
                    page: dist.join("pizza/pizza.html"),
                    stylesheet: dist.join("pizza/css/main.min.css"),
                },
            ]
        );
        assert_eq!(
            &ops[2..],
            &[
                RecordedOp::MinifyHtml(dist.join("index.html")),
                RecordedOp::MinifyHtml(dist.join("pizza/pizza.html")),
            ]
        );
    }

    #[test]
    fn images_build_resizes_after_compressing() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        pipeline.run(BuildTask::Kind(Kind::Images)).unwrap();

        assert_eq!(
            image::image_dimensions(dist.join("pizza/images/pizzeria.jpg")).unwrap(),
            (360, 270)
        );
        assert_eq!(
            image::image_dimensions(dist.join("pizza/images/pizzeria-preview.jpg")).unwrap(),
            (100, 75)
        );
        assert_eq!(
            image::image_dimensions(dist.join("index/images/me.jpg")).unwrap(),
            (32, 32)
        );
    }

    #[test]
    fn every_kind_is_idempotent() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        for kind in Kind::ALL {
            pipeline.run(BuildTask::Kind(kind)).unwrap();
            let first = snapshot(&dist);
            pipeline.run(BuildTask::Kind(kind)).unwrap();
            let second = snapshot(&dist);

            assert_eq!(first, second, "build:{} is not idempotent", kind);
        }
    }

    #[test]
    fn partial_build_leaves_other_kinds_untouched() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());
        let dist = temp.path().join("dist");

        pipeline.run(BuildTask::All).unwrap();
        let before = snapshot(&dist);
        pipeline.run(BuildTask::Kind(Kind::Css)).unwrap();
        let after = snapshot(&dist);

        for (path, contents) in &before {
            if !Kind::Css.owns(path) {
                assert_eq!(after.get(path), Some(contents), "{} changed", path.display());
            }
        }
    }

    #[test]
    fn failing_step_stops_the_task() {
        let temp = fixture();
        let (pipeline, toolchain) = pipeline(temp.path());
        write(
            &temp.path().join("src/pizza/pizza.html"),
            b"<!-- build:css broken.css -->",
        );

        let result = pipeline.run(BuildTask::Kind(Kind::Html));

        assert!(matches!(result, Err(BuildError::HtmlError { .. })));
        assert!(toolchain.get_operations().is_empty());
    }

    #[test]
    fn bad_rewrite_rule_fails_the_html_task() {
        let temp = fixture();
        let mut config = SiteConfig::with_root(temp.path());
        config.html.rewrite[0].prefix = "x".repeat(500_000);
        let toolchain = Arc::new(RecordingToolchain::new());
        let pipeline = Pipeline::with_toolchain(
            Arc::new(config),
            Arc::clone(&toolchain) as Arc<dyn Toolchain>,
        );

        let result = pipeline.run(BuildTask::Kind(Kind::Html));

        assert!(matches!(result, Err(BuildError::HtmlError { .. })));
        assert!(toolchain.get_operations().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_output_directory_fails_the_task() {
        use std::os::unix::fs::PermissionsExt;

        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());
        pipeline.run(BuildTask::Kind(Kind::Images)).unwrap();

        let locked = temp.path().join("dist/pizza/images");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let readable = fs::read_dir(&locked).is_ok();

        let result = pipeline.run(BuildTask::Kind(Kind::Css));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Privileged users can read the directory anyway
        if !readable {
            assert!(matches!(result, Err(BuildError::ReadError { .. })));
        }
    }

    #[test]
    fn missing_source_aborts_before_transforming() {
        let temp = fixture();
        fs::remove_dir_all(temp.path().join("src")).unwrap();
        let (pipeline, _) = pipeline(temp.path());

        let result = pipeline.run(BuildTask::Kind(Kind::Css));

        assert!(matches!(result, Err(BuildError::SourceMissing(_))));
    }

    #[test]
    fn concurrent_runs_are_refused() {
        let temp = fixture();
        let (pipeline, _) = pipeline(temp.path());

        let _held = RunLock::acquire(&pipeline.config().lock_path()).unwrap();
        let result = pipeline.run(BuildTask::Kind(Kind::Js));

        assert!(matches!(result, Err(BuildError::Busy(_))));
    }
}
