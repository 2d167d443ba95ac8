//! PageSpeed Insights client.

use std::future::Future;

use kiln_build::config::Strategy;
use serde::Deserialize;

/// Errors from a page-speed audit.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("PageSpeed request failed: {0}")]
    Request(String),

    #[error("PageSpeed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected PageSpeed response: {0}")]
    Response(String),
}

/// Result of auditing one URL with one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub url: String,
    pub strategy: Strategy,

    /// Performance score, 0-100
    pub score: f64,
}

/// Something that scores a public URL.
pub trait Auditor: Send + Sync {
    fn audit(
        &self,
        url: &str,
        strategy: Strategy,
    ) -> impl Future<Output = Result<AuditReport, AuditError>> + Send;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageSpeedResponse {
    lighthouse_result: LighthouseResult,
}

#[derive(Deserialize)]
struct LighthouseResult {
    categories: Categories,
}

#[derive(Deserialize)]
struct Categories {
    performance: Category,
}

#[derive(Deserialize)]
struct Category {
    score: Option<f64>,
}

/// Extract the performance score (0-100) from a v5 response body.
pub fn performance_score(body: &str) -> Result<f64, AuditError> {
    let response: PageSpeedResponse =
        serde_json::from_str(body).map_err(|e| AuditError::Response(e.to_string()))?;

    response
        .lighthouse_result
        .categories
        .performance
        .score
        .map(|score| (score * 100.0).round())
        .ok_or_else(|| AuditError::Response("performance score is null".to_string()))
}

/// Client for the PageSpeed Insights v5 API, used without an API key.
pub struct PageSpeedClient {
    client: reqwest::Client,
    endpoint: String,
    locale: String,
}

impl PageSpeedClient {
    pub fn new(endpoint: &str, locale: &str) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            locale: locale.to_string(),
        })
    }
}

impl Auditor for PageSpeedClient {
    async fn audit(&self, url: &str, strategy: Strategy) -> Result<AuditReport, AuditError> {
        tracing::info!("Auditing {} ({})", url, strategy.as_str());

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("url", url),
                ("strategy", strategy.as_str()),
                ("locale", self.locale.as_str()),
                ("category", "performance"),
            ])
            .send()
            .await
            .map_err(|e| AuditError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuditError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(AuditError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(AuditReport {
            url: url.to_string(),
            strategy,
            score: performance_score(&body)?,
        })
    }
}
