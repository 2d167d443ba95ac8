//! Preview server command.

use std::sync::Arc;

use anyhow::Result;
use kiln_build::SiteConfig;
use kiln_server::{PreviewServer, PreviewServerConfig};

/// Serve the output tree on the audit port.
pub async fn run(config: Arc<SiteConfig>, open: bool) -> Result<()> {
    let server_config = PreviewServerConfig {
        dir: config.output_dir(),
        port: config.psi.port,
        ..Default::default()
    };

    if open {
        let url = format!("http://{}:{}", server_config.host, server_config.port);
        let _ = open::that(&url);
    }

    PreviewServer::new(server_config).serve().await?;

    Ok(())
}
