//! Prometheus exporter for camera-management API statistics.
//!
//! This crate polls a camera controller's REST API on a fixed interval and
//! exposes per-camera gauges either via an HTTP `/metrics` endpoint or by
//! pushing to a Prometheus push gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Camera API    │────>│     Mapping     │────>│   HTTP Server   │
//! │ (/api/2.0/cam.) │     │   (MetricSet)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!                                  │
//!                                  └─────────────>  Push gateway
//! ```
//!
//! # Usage
//!
//! ```bash
//! camerametrics --config .config.toml --env Prod --log-level INFO
//! ```
//!
//! # Configuration
//!
//! See [`config::RunContext`] for configuration options.

pub mod camera;
pub mod config;
pub mod exporter;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod mapping;
pub mod metrics;
pub mod push;
pub mod stats;

pub use camera::CameraRecord;
pub use config::{ConfigError, RunContext};
pub use exporter::{CycleOutcome, Exporter};
pub use fetcher::{CameraFetcher, FetchOutcome, RetryPolicy};
pub use http::HttpServer;
pub use metrics::{MetricSet, SharedMetrics};
pub use push::PushGateway;
pub use stats::{SharedStats, StatsRecorder};
