//! Push gateway client.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::config::RunContext;
use crate::metrics::{CONTENT_TYPE, MetricSet};

/// Push errors. These are logged by the caller and never retried.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Push request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("Gateway rejected push: {0}")]
    Status(StatusCode),
}

/// Build the push URL for a job: `{gateway}:{port}/metrics/job/{job}`.
///
/// A gateway without a scheme is treated as plain HTTP.
pub fn gateway_url(gateway: &str, port: u16, job: &str) -> Result<Url, PushError> {
    let base = if gateway.contains("://") {
        format!("{}:{}", gateway.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", gateway.trim_end_matches('/'), port)
    };

    let mut url = Url::parse(&base).map_err(|e| PushError::InvalidUrl(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| PushError::InvalidUrl(base.clone()))?
        .pop_if_empty()
        .extend(["metrics", "job", job]);

    Ok(url)
}

/// Pushes metric snapshots to a Prometheus push gateway.
pub struct PushGateway {
    client: Client,
    url: Url,
}

impl PushGateway {
    /// Create a client for the gateway and job described by `ctx`.
    pub fn new(ctx: &RunContext) -> Result<Self, PushError> {
        Self::with_url(
            gateway_url(&ctx.gateway, ctx.gateway_port, &ctx.job)?,
            ctx.request_timeout(),
        )
    }

    /// Create a client for an explicit push URL.
    pub fn with_url(url: Url, timeout: Duration) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PushError::Client)?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Replace the job's metrics on the gateway with the current snapshot.
    pub async fn push(&self, metrics: &MetricSet) -> Result<(), PushError> {
        let body = metrics.render();

        let response = self
            .client
            .put(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(PushError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status(status));
        }

        debug!(url = %self.url, "Pushed metrics to gateway");
        Ok(())
    }
}
