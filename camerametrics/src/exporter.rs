//! The poll loop: fetch, map, optionally push, sleep.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunContext;
use crate::fetcher::{CameraFetcher, FetchOutcome, TransportError};
use crate::mapping::apply_records;
use crate::metrics::SharedMetrics;
use crate::push::{PushError, PushGateway};
use crate::stats::SharedStats;

/// Errors building the exporter. Only raised at startup.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Camera API client: {0}")]
    Fetcher(#[from] TransportError),
    #[error("Push gateway client: {0}")]
    Push(#[from] PushError),
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Camera data was applied. `pushed` is `None` in pull mode or when the
    /// list was empty.
    Applied { records: usize, pushed: Option<bool> },
    /// The response had no camera data.
    NoData,
    /// Every fetch attempt failed.
    FetchFailed,
    /// Shutdown was requested during the cycle.
    Cancelled,
}

/// Drives the poll loop.
pub struct Exporter {
    metrics: SharedMetrics,
    stats: SharedStats,
    fetcher: CameraFetcher,
    gateway: Option<PushGateway>,
    interval: Duration,
}

impl Exporter {
    pub fn new(
        metrics: SharedMetrics,
        stats: SharedStats,
        fetcher: CameraFetcher,
        gateway: Option<PushGateway>,
        interval: Duration,
    ) -> Self {
        Self {
            metrics,
            stats,
            fetcher,
            gateway,
            interval,
        }
    }

    /// Build the exporter from the run context. Push mode gets a gateway
    /// client; pull mode does not.
    pub fn from_context(
        ctx: &RunContext,
        metrics: SharedMetrics,
        stats: SharedStats,
    ) -> Result<Self, ExporterError> {
        let fetcher = CameraFetcher::new(ctx)?;
        let gateway = if ctx.push {
            Some(PushGateway::new(ctx)?)
        } else {
            None
        };

        Ok(Self::new(
            metrics,
            stats,
            fetcher,
            gateway,
            ctx.refresh_interval(),
        ))
    }

    /// Run poll cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            push = self.gateway.is_some(),
            "Poll loop started"
        );

        while !cancel.is_cancelled() {
            let outcome = self.run_cycle(&cancel).await;
            debug!(?outcome, "Poll cycle finished");

            if outcome == CycleOutcome::Cancelled {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Poll loop stopped");
    }

    /// Run a single fetch/map/push cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        self.stats.update(|s| s.cycles += 1);

        let records = match self.fetcher.fetch(cancel).await {
            FetchOutcome::Records(records) => records,
            FetchOutcome::NoData => {
                self.stats.update(|s| s.empty_responses += 1);
                return CycleOutcome::NoData;
            }
            FetchOutcome::Failed { attempts, reason } => {
                warn!(attempts, reason = %reason, "Skipping metric update for this cycle");
                self.stats.update(|s| s.fetch_failures += 1);
                return CycleOutcome::FetchFailed;
            }
            FetchOutcome::Cancelled => return CycleOutcome::Cancelled,
        };

        let applied = apply_records(&self.metrics, &records);
        self.stats.update(|s| {
            s.cycles_with_data += 1;
            s.records_applied += applied as u64;
        });

        // An empty list leaves the snapshot unchanged.
        let pushed = match &self.gateway {
            Some(gateway) if applied > 0 => Some(self.push(gateway).await),
            _ => None,
        };

        CycleOutcome::Applied {
            records: applied,
            pushed,
        }
    }

    /// Push the current snapshot. Failures are logged and not retried.
    async fn push(&self, gateway: &PushGateway) -> bool {
        info!(url = %gateway.url(), "Pushing metrics to gateway");

        match gateway.push(&self.metrics).await {
            Ok(()) => {
                self.stats.update(|s| s.pushes += 1);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to push metrics");
                self.stats.update(|s| s.push_failures += 1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RetryPolicy;
    use crate::metrics::MetricSet;
    use crate::stats::StatsRecorder;
    use reqwest::Url;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CAMERA_PATH: &str = "/api/2.0/camera";

    fn exporter_for(server: &MockServer, push: bool) -> (Exporter, SharedMetrics, SharedStats) {
        let metrics: SharedMetrics = Arc::new(MetricSet::new());
        let stats: SharedStats = Arc::new(StatsRecorder::new());
        let retry = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        };
        let fetcher = CameraFetcher::with_url(
            format!("{}{}?apiKey=test_key", server.uri(), CAMERA_PATH),
            Duration::from_secs(5),
            retry,
        )
        .unwrap();
        let gateway = push.then(|| {
            let url = Url::parse(&format!("{}/metrics/job/test_job", server.uri())).unwrap();
            PushGateway::with_url(url, Duration::from_secs(5)).unwrap()
        });

        let exporter = Exporter::new(
            metrics.clone(),
            stats.clone(),
            fetcher,
            gateway,
            Duration::from_millis(50),
        );
        (exporter, metrics, stats)
    }

    async fn mount_cameras(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_cycle_applies_records() {
        let server = MockServer::start().await;
        mount_cameras(
            &server,
            json!({"data": [{"name": "cam1", "state": "CONNECTED"}, {"name": "cam2"}]}),
        )
        .await;

        let (exporter, metrics, stats) = exporter_for(&server, false);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                records: 2,
                pushed: None
            }
        );
        assert_eq!(metrics.name_available.get(["cam1"]), Some(1.0));
        assert_eq!(metrics.state.get(["cam1", "CONNECTED"]), Some(1.0));
        assert_eq!(stats.snapshot().records_applied, 2);
        assert_eq!(stats.snapshot().cycles_with_data, 1);
    }

    #[tokio::test]
    async fn test_cycle_without_data_leaves_metrics_untouched() {
        let server = MockServer::start().await;
        mount_cameras(&server, json!({"cam_data": [{"name": "cam1"}]})).await;

        let (exporter, metrics, stats) = exporter_for(&server, false);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::NoData);
        assert_eq!(metrics.series_count(), 0);
        assert_eq!(stats.snapshot().empty_responses, 1);
    }

    #[tokio::test]
    async fn test_cycle_fetch_failure_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CAMERA_PATH))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let (exporter, metrics, stats) = exporter_for(&server, true);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::FetchFailed);
        assert_eq!(metrics.series_count(), 0);
        assert_eq!(stats.snapshot().fetch_failures, 1);
        // Nothing to push after a failed fetch.
        assert_eq!(stats.snapshot().pushes, 0);
    }

    #[tokio::test]
    async fn test_cycle_pushes_once_after_all_records() {
        let server = MockServer::start().await;
        mount_cameras(
            &server,
            json!({"data": [{"name": "cam1"}, {"name": "cam2"}, {"name": "cam3"}]}),
        )
        .await;
        Mock::given(method("PUT"))
            .and(path("/metrics/job/test_job"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (exporter, _metrics, stats) = exporter_for(&server, true);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                records: 3,
                pushed: Some(true)
            }
        );
        assert_eq!(stats.snapshot().pushes, 1);
    }

    #[tokio::test]
    async fn test_empty_data_list_is_not_pushed() {
        let server = MockServer::start().await;
        mount_cameras(&server, json!({"data": []})).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (exporter, _metrics, stats) = exporter_for(&server, true);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                records: 0,
                pushed: None
            }
        );
        assert_eq!(stats.snapshot().pushes, 0);
        assert_eq!(stats.snapshot().push_failures, 0);
    }

    #[tokio::test]
    async fn test_push_failure_is_swallowed() {
        let server = MockServer::start().await;
        mount_cameras(&server, json!({"data": [{"name": "cam1"}]})).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (exporter, metrics, stats) = exporter_for(&server, true);
        let outcome = exporter.run_cycle(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                records: 1,
                pushed: Some(false)
            }
        );
        assert_eq!(metrics.name_available.get(["cam1"]), Some(1.0));
        assert_eq!(stats.snapshot().push_failures, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = MockServer::start().await;
        mount_cameras(&server, json!({"data": [{"name": "cam1"}]})).await;

        let (exporter, _metrics, stats) = exporter_for(&server, false);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), exporter.run(cancel))
            .await
            .expect("loop should stop after cancel");

        // Several 50ms cycles fit in 300ms.
        assert!(stats.snapshot().cycles >= 2);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_cancelled() {
        let server = MockServer::start().await;
        let (exporter, _metrics, stats) = exporter_for(&server, false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        exporter.run(cancel).await;

        assert_eq!(stats.snapshot().cycles, 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
