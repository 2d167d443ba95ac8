//! Public tunnels to the local preview.

use std::future::Future;
use std::process::Stdio;

use kiln_build::ToolCommand;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Errors from opening a tunnel.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Tunnel failed: {0}")]
    Rejected(String),

    #[error("{program} exited before the tunnel was ready ({status})")]
    Exited { program: String, status: String },

    #[error("Failed to read tunnel output: {0}")]
    Io(String),
}

/// An open tunnel. The tunnel stays up until the session is closed or dropped.
#[derive(Debug)]
pub struct TunnelSession {
    public_url: String,
    child: Option<Child>,
}

impl TunnelSession {
    pub fn new(public_url: impl Into<String>, child: Option<Child>) -> Self {
        Self {
            public_url: public_url.into(),
            child,
        }
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Tear the tunnel down.
    pub async fn close(mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Tunnel process already gone: {}", e);
            }
        }
    }
}

/// Something that exposes a local port under a public URL.
pub trait Tunnel: Send + Sync {
    fn open(&self, port: u16) -> impl Future<Output = Result<TunnelSession, TunnelError>> + Send;
}

/// One line of ngrok's JSON log, reduced to what matters here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Started(String),
    Error(String),
    Other,
}

#[derive(Deserialize)]
struct RawLogLine {
    #[serde(default)]
    lvl: String,
    #[serde(default)]
    msg: String,
    url: Option<String>,
    err: Option<String>,
}

/// Classify a line of `--log-format json` output.
///
/// Lines that are not JSON are ignored.
pub fn parse_log_line(line: &str) -> LogLine {
    let Ok(raw) = serde_json::from_str::<RawLogLine>(line) else {
        return LogLine::Other;
    };

    if matches!(raw.lvl.as_str(), "eror" | "crit" | "error") {
        let message = match raw.err {
            Some(err) if !err.is_empty() => format!("{}: {}", raw.msg, err),
            _ => raw.msg,
        };
        return LogLine::Error(message);
    }

    match raw.url {
        Some(url) if raw.msg == "started tunnel" && !url.is_empty() => LogLine::Started(url),
        _ => LogLine::Other,
    }
}

/// Tunnel backed by an `ngrok` child process.
pub struct NgrokTunnel {
    command: ToolCommand,
}

impl NgrokTunnel {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl Tunnel for NgrokTunnel {
    async fn open(&self, port: u16) -> Result<TunnelSession, TunnelError> {
        let program = self.command.program.clone();
        let args = self
            .command
            .render_args(&[("port", port.to_string())], false);
        tracing::debug!("Running {} {}", program, args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| TunnelError::Spawn {
            program: program.clone(),
            message: "stdout not captured".to_string(),
        })?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| TunnelError::Io(e.to_string()))?;

            let Some(line) = line else {
                let status = child
                    .wait()
                    .await
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                return Err(TunnelError::Exited { program, status });
            };

            match parse_log_line(&line) {
                LogLine::Started(url) => {
                    tracing::info!("Tunnel open: {} -> localhost:{}", url, port);
                    tokio::spawn(drain(lines));
                    return Ok(TunnelSession::new(url, Some(child)));
                }
                LogLine::Error(message) => return Err(TunnelError::Rejected(message)),
                LogLine::Other => tracing::debug!("{}", line),
            }
        }
    }
}

/// Keep reading the log so the child never blocks on a full pipe.
async fn drain(mut lines: tokio::io::Lines<BufReader<ChildStdout>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("{}", line);
    }
}
