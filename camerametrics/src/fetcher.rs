//! Camera API client with bounded retry.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::camera::{CameraRecord, records_from_body};
use crate::config::RunContext;

/// Attempts per poll cycle before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Build the camera list URL.
pub fn camera_api_url(host: &str, port: u16, key: &str) -> String {
    format!("https://{host}:{port}/api/2.0/camera?apiKey={key}")
}

/// Error for a single fetch attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("Unexpected status: {0}")]
    Status(StatusCode),
    #[error("Invalid response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Retry policy for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

/// Result of one fetch, retries included.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The response carried a `data` list.
    Records(Vec<CameraRecord>),
    /// The response parsed but had no `data` list.
    NoData,
    /// Every attempt failed.
    Failed { attempts: u32, reason: String },
    /// Shutdown was requested while fetching.
    Cancelled,
}

/// Fetches the camera list from the camera API.
pub struct CameraFetcher {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl CameraFetcher {
    /// Create a fetcher for the camera API described by `ctx`.
    pub fn new(ctx: &RunContext) -> Result<Self, TransportError> {
        Self::with_url(
            camera_api_url(&ctx.api_host, ctx.api_port, &ctx.api_key),
            ctx.request_timeout(),
            RetryPolicy::default(),
        )
    }

    /// Create a fetcher for an explicit URL.
    ///
    /// Certificate verification is disabled: the camera controller is a local
    /// device with a self-signed certificate.
    pub fn with_url(
        url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            url: url.into(),
            retry,
        })
    }

    /// Fetch the camera list, retrying transport errors.
    ///
    /// Each failed attempt is followed by the retry delay, so a cycle that
    /// exhausts its attempts has waited once per attempt.
    ///
    /// Never returns an error: exhausted retries produce
    /// [`FetchOutcome::Failed`] and cancellation produces
    /// [`FetchOutcome::Cancelled`].
    pub async fn fetch(&self, cancel: &CancellationToken) -> FetchOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                result = self.fetch_once() => result,
            };

            let error = match result {
                Ok(body) => {
                    return match records_from_body(body) {
                        Some(records) => {
                            debug!(records = records.len(), attempts, "Fetched camera data");
                            FetchOutcome::Records(records)
                        }
                        None => {
                            warn!("Camera API response has no data list");
                            FetchOutcome::NoData
                        }
                    };
                }
                Err(e) => e,
            };

            error!(
                attempt = attempts,
                error = %error,
                "HTTP error while fetching camera data, retrying in {:?}", self.retry.delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(self.retry.delay) => {}
            }

            if attempts >= max_attempts {
                error!(attempts, "Failed to fetch camera data after {} attempts", attempts);
                return FetchOutcome::Failed {
                    attempts,
                    reason: error.to_string(),
                };
            }
        }
    }

    /// Perform a single GET. Errors are stripped of the URL, which carries
    /// the API key.
    async fn fetch_once(&self) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Body(e.without_url()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CAMERA_PATH: &str = "/api/2.0/camera";

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    }

    fn fetcher_for(server: &MockServer, retry: RetryPolicy) -> CameraFetcher {
        let url = format!("{}{}?apiKey=test_key", server.uri(), CAMERA_PATH);
        CameraFetcher::with_url(url, Duration::from_secs(5), retry).unwrap()
    }

    #[test]
    fn test_camera_api_url() {
        assert_eq!(
            camera_api_url("nvr.local", 7443, "abc"),
            "https://nvr.local:7443/api/2.0/camera?apiKey=abc"
        );
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fetch_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .and(query_param("apiKey", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"name": "Demo Camera", "state": "CONNECTED"}],
                "meta": {"totalCount": 1, "filteredCount": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher_for(&server, quick_retry())
            .fetch(&CancellationToken::new())
            .await;

        match outcome {
            FetchOutcome::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].name(), "Demo Camera");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_without_data_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"cam_data": [], "meta": {"totalCount": 0}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher_for(&server, quick_retry())
            .fetch(&CancellationToken::new())
            .await;

        assert!(matches!(outcome, FetchOutcome::NoData));
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let retry = quick_retry();
        let started = Instant::now();
        let outcome = fetcher_for(&server, retry)
            .fetch(&CancellationToken::new())
            .await;

        match outcome {
            FetchOutcome::Failed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("500"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // One wait after each of the three attempts.
        assert!(started.elapsed() >= retry.delay * 3);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_recovers_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let outcome = fetcher_for(&server, quick_retry())
            .fetch(&CancellationToken::new())
            .await;

        assert!(matches!(outcome, FetchOutcome::Records(ref r) if r.is_empty()));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_json_counts_as_failed_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let retry = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        };
        let outcome = fetcher_for(&server, retry)
            .fetch(&CancellationToken::new())
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failed_outcome() {
        // Bind then drop a listener so nothing accepts on the port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let retry = RetryPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(10),
        };
        let fetcher = CameraFetcher::with_url(
            format!("http://{addr}{CAMERA_PATH}?apiKey=secret"),
            Duration::from_secs(2),
            retry,
        )
        .unwrap();

        match fetcher.fetch(&CancellationToken::new()).await {
            FetchOutcome::Failed { attempts, reason } => {
                assert_eq!(attempts, 1);
                assert!(!reason.contains("secret"), "reason leaks key: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let retry = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        };
        let fetcher = fetcher_for(&server, retry);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch(&cancel))
            .await
            .expect("fetch should observe cancellation");

        assert!(matches!(outcome, FetchOutcome::Cancelled));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
