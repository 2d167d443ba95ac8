//! Static preview server over the output tree.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

/// Configuration for the preview server.
#[derive(Debug, Clone)]
pub struct PreviewServerConfig {
    /// Directory to serve
    pub dir: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,
}

impl Default for PreviewServerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dist"),
            host: "127.0.0.1".to_string(),
            port: 45096,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Directory not found: {0}. Run 'kiln build' first.")]
    MissingDir(String),

    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(String, String),

    #[error("Server error: {0}")]
    Serve(String),
}

/// Preview server.
pub struct PreviewServer {
    config: PreviewServerConfig,
}

/// A server running in the background.
///
/// Dropping the handle leaves the server running until the runtime stops;
/// call [`RunningServer::shutdown`] to stop it early.
pub struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?
    }
}

impl PreviewServer {
    /// Create a new preview server.
    pub fn new(config: PreviewServerConfig) -> Self {
        Self { config }
    }

    async fn bind(&self) -> Result<(TcpListener, Router), ServerError> {
        if !self.config.dir.is_dir() {
            return Err(ServerError::MissingDir(
                self.config.dir.display().to_string(),
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(addr.clone()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr.to_string(), e.to_string()))?;

        let app = Router::new().fallback_service(ServeDir::new(&self.config.dir));

        Ok((listener, app))
    }

    /// Serve until the process ends.
    pub async fn serve(self) -> Result<(), ServerError> {
        let (listener, app) = self.bind().await?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Serving {} at http://{}", self.config.dir.display(), addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))
    }

    /// Bind now and serve in a background task.
    pub async fn spawn(self) -> Result<RunningServer, ServerError> {
        let (listener, app) = self.bind().await?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))?;
        let (shutdown, signal) = oneshot::channel::<()>();

        tracing::info!("Serving {} at http://{}", self.config.dir.display(), addr);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
                .map_err(|e| ServerError::Serve(e.to_string()))
        });

        Ok(RunningServer {
            addr,
            shutdown,
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_files_from_output_tree() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("index.html"), "<h1>preview</h1>").unwrap();

        let server = PreviewServer::new(PreviewServerConfig {
            dir: temp.path().to_path_buf(),
            port: 0,
            ..Default::default()
        })
        .spawn()
        .await
        .unwrap();

        let response = get(server.local_addr(), "/index.html").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("<h1>preview</h1>"));

        let missing = get(server.local_addr(), "/nope.html").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn refuses_missing_directory() {
        let result = PreviewServer::new(PreviewServerConfig {
            dir: PathBuf::from("/nonexistent/kiln/dist"),
            port: 0,
            ..Default::default()
        })
        .spawn()
        .await;

        assert!(matches!(result, Err(ServerError::MissingDir(_))));
    }

    #[test]
    fn defaults_to_psi_port() {
        assert_eq!(PreviewServerConfig::default().port, 45096);
    }
}
