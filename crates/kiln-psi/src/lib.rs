//! Page-speed audits of a kiln preview through a public tunnel.

pub mod pagespeed;
pub mod tunnel;

use kiln_build::config::{PsiConfig, Strategy};

pub use pagespeed::{AuditError, AuditReport, Auditor, PageSpeedClient};
pub use tunnel::{NgrokTunnel, Tunnel, TunnelError, TunnelSession};

#[derive(Debug, thiserror::Error)]
pub enum PsiError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("{} score {score} is below the threshold of {threshold}", .strategy.as_str())]
    BelowThreshold {
        strategy: Strategy,
        score: f64,
        threshold: u8,
    },
}

/// Open a tunnel to `config.port` and audit its public URL once per strategy.
///
/// The auditor is only reached once the tunnel is up. Audits run in order
/// and the first score under the threshold ends the run.
pub async fn run_psi_ngrok<T: Tunnel, A: Auditor>(
    tunnel: &T,
    auditor: &A,
    config: &PsiConfig,
) -> Result<Vec<AuditReport>, PsiError> {
    let session = tunnel.open(config.port).await?;

    let mut reports = Vec::with_capacity(config.strategies.len());
    for &strategy in &config.strategies {
        let report = match auditor.audit(session.public_url(), strategy).await {
            Ok(report) => report,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        tracing::info!("{}: {}", strategy.as_str(), report.score);

        if report.score < f64::from(config.threshold) {
            session.close().await;
            return Err(PsiError::BelowThreshold {
                strategy,
                score: report.score,
                threshold: config.threshold,
            });
        }
        reports.push(report);
    }

    session.close().await;
    Ok(reports)
}
