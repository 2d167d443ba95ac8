//! External tools invoked across a process boundary.
//!
//! JS minification, critical-CSS inlining and HTML minification are handed
//! to third-party command-line tools. Each operation rewrites its file in
//! place: the input path is also the output path.

use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::config::ToolsConfig;

/// Errors from running an external tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to write output of {program} to {path}: {message}")]
    Output {
        program: String,
        path: String,
        message: String,
    },
}

/// A configured external command.
///
/// Arguments may contain `{name}` placeholders which are substituted before
/// the command runs (`{input}`, `{output}`, `{css}`, `{base}`, `{map}`,
/// `{map_name}`, `{port}`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolCommand {
    /// Program name or path
    pub program: String,

    /// Argument template
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra arguments appended only when a source map is requested
    #[serde(default)]
    pub map_args: Vec<String>,

    /// Write the tool's stdout to `{output}` instead of expecting the tool to do it
    #[serde(default)]
    pub stdout_to_output: bool,
}

impl ToolCommand {
    /// Create a command from a program and argument template.
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            map_args: Vec::new(),
            stdout_to_output: false,
        }
    }

    /// Substitute placeholders in the argument template.
    pub fn render_args(&self, vars: &[(&str, String)], with_map: bool) -> Vec<String> {
        let extra: &[String] = if with_map { &self.map_args } else { &[] };

        self.args
            .iter()
            .chain(extra)
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
            })
            .collect()
    }

    /// Run the command to completion.
    ///
    /// With `stdout_to_output`, captured stdout replaces the file at `output`.
    pub fn run(
        &self,
        vars: &[(&str, String)],
        with_map: bool,
        output: &Path,
    ) -> Result<(), ToolError> {
        let args = self.render_args(vars, with_map);
        tracing::debug!("Running {} {}", self.program, args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: result
                    .status
                    .code()
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if self.stdout_to_output {
            std::fs::write(output, &result.stdout).map_err(|e| ToolError::Output {
                program: self.program.clone(),
                path: output.display().to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// The in-place transformations delegated to external tools.
pub trait Toolchain: Send + Sync {
    /// Minify a script in place, writing a source map to `source_map` when given.
    fn minify_js(&self, file: &Path, source_map: Option<&Path>) -> Result<(), ToolError>;

    /// Inline the above-the-fold rules of `stylesheet` into `page`, in place.
    fn inline_critical(&self, page: &Path, stylesheet: &Path, base: &Path)
        -> Result<(), ToolError>;

    /// Minify a page in place.
    fn minify_html(&self, page: &Path) -> Result<(), ToolError>;
}

/// Toolchain that shells out to the configured commands.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    tools: ToolsConfig,
}

impl CommandToolchain {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }
}

fn path_var(name: &'static str, path: &Path) -> (&'static str, String) {
    (name, path.display().to_string())
}

impl Toolchain for CommandToolchain {
    fn minify_js(&self, file: &Path, source_map: Option<&Path>) -> Result<(), ToolError> {
        let mut vars = vec![path_var("input", file), path_var("output", file)];
        if let Some(map) = source_map {
            vars.push(path_var("map", map));
            let map_name = map
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            vars.push(("map_name", map_name));
        }

        self.tools
            .js_minify
            .run(&vars, source_map.is_some(), file)
    }

    fn inline_critical(
        &self,
        page: &Path,
        stylesheet: &Path,
        base: &Path,
    ) -> Result<(), ToolError> {
        let vars = [
            path_var("input", page),
            path_var("output", page),
            path_var("css", stylesheet),
            path_var("base", base),
        ];

        self.tools.critical.run(&vars, false, page)
    }

    fn minify_html(&self, page: &Path) -> Result<(), ToolError> {
        let vars = [path_var("input", page), path_var("output", page)];

        self.tools.html_minify.run(&vars, false, page)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Toolchain double that records invocations and leaves files untouched.
    #[derive(Default)]
    pub struct RecordingToolchain {
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        MinifyJs {
            file: PathBuf,
            source_map: Option<PathBuf>,
        },
        InlineCritical {
            page: PathBuf,
            stylesheet: PathBuf,
        },
        MinifyHtml(PathBuf),
    }

    impl RecordingToolchain {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl Toolchain for RecordingToolchain {
        fn minify_js(&self, file: &Path, source_map: Option<&Path>) -> Result<(), ToolError> {
            self.operations.lock().unwrap().push(RecordedOp::MinifyJs {
                file: file.to_path_buf(),
                source_map: source_map.map(Path::to_path_buf),
            });
            Ok(())
        }

        fn inline_critical(
            &self,
            page: &Path,
            stylesheet: &Path,
            _base: &Path,
        ) -> Result<(), ToolError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::InlineCritical {
                    page: page.to_path_buf(),
                    stylesheet: stylesheet.to_path_buf(),
                });
            Ok(())
        }

        fn minify_html(&self, page: &Path) -> Result<(), ToolError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::MinifyHtml(page.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn renders_placeholders() {
        let mut cmd = ToolCommand::new("uglifyjs", &["{input}", "-o", "{output}"]);
        cmd.map_args = vec!["--source-map".into(), "url='{map_name}'".into()];

        let vars = [
            ("input", "a.js".to_string()),
            ("output", "a.js".to_string()),
            ("map_name", "a.js.map".to_string()),
        ];

        assert_eq!(cmd.render_args(&vars, false), vec!["a.js", "-o", "a.js"]);
        assert_eq!(
            cmd.render_args(&vars, true),
            vec!["a.js", "-o", "a.js", "--source-map", "url='a.js.map'"]
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let cmd = ToolCommand::new("kiln-no-such-tool-on-path", &[]);
        let result = cmd.run(&[], false, Path::new("unused"));

        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_is_reported() {
        let cmd = ToolCommand::new("false", &[]);
        let result = cmd.run(&[], false, Path::new("unused"));

        assert!(matches!(result, Err(ToolError::Failed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_into_output_file() {
        let temp = tempfile::tempdir().unwrap();
        let page = temp.path().join("page.html");
        std::fs::write(&page, "<p>hi</p>").unwrap();

        let mut cmd = ToolCommand::new("cat", &["{input}"]);
        cmd.stdout_to_output = true;
        cmd.run(&[path_var("input", &page)], false, &page).unwrap();

        assert_eq!(std::fs::read_to_string(&page).unwrap(), "<p>hi</p>");
    }
}
