//! Page-speed audit through a public tunnel.

use std::sync::Arc;

use anyhow::Result;
use kiln_build::SiteConfig;
use kiln_psi::{NgrokTunnel, PageSpeedClient};
use kiln_server::{PreviewServer, PreviewServerConfig};

/// Run `psi-ngrok` against the current output tree.
pub async fn run(config: Arc<SiteConfig>) -> Result<()> {
    let psi = &config.psi;

    let server = if psi.serve {
        let server = PreviewServer::new(PreviewServerConfig {
            dir: config.output_dir(),
            port: psi.port,
            ..Default::default()
        })
        .spawn()
        .await?;
        Some(server)
    } else {
        None
    };

    let tunnel = NgrokTunnel::new(psi.tunnel.clone());
    let auditor = PageSpeedClient::new(&psi.endpoint, &psi.locale)?;

    let result = kiln_psi::run_psi_ngrok(&tunnel, &auditor, psi).await;

    if let Some(server) = server {
        server.shutdown().await?;
    }

    for report in result? {
        tracing::info!(
            "{} ({}): {} / threshold {}",
            report.url,
            report.strategy.as_str(),
            report.score,
            psi.threshold
        );
    }

    Ok(())
}
