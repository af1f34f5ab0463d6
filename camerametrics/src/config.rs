//! Configuration for the camera metrics exporter.
//!
//! The configuration file is TOML with one table per environment:
//!
//! ```toml
//! [Prod]
//! api_host = "nvr.local"
//! api_port = 7443
//! api_key = "secret"
//! http_port = 9090
//! refresh_rate = 60
//! push = false
//! gateway = "pushgateway.local"
//! gateway_port = 9091
//! job = "camerametrics"
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file path.
pub const DEFAULT_CONFIG_FILE: &str = ".config.toml";

/// Default environment table to load.
pub const DEFAULT_ENV: &str = "Prod";

/// Liveness endpoint served next to the metrics path.
pub const HEALTH_PATH: &str = "/health";

/// Readiness endpoint served next to the metrics path.
pub const READY_PATH: &str = "/ready";

/// Keys every environment table must define.
pub const REQUIRED_KEYS: [&str; 9] = [
    "api_host",
    "api_port",
    "api_key",
    "http_port",
    "refresh_rate",
    "push",
    "gateway",
    "gateway_port",
    "job",
];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Environment '{0}' not found in config")]
    MissingEnvironment(String),
    #[error("Missing required key '{key}' for environment '{env}'")]
    MissingKey { env: String, key: &'static str },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Runtime parameters for one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Environment name the context was loaded from.
    #[serde(skip)]
    pub env: String,

    /// Camera API host.
    pub api_host: String,

    /// Camera API port.
    pub api_port: u16,

    /// Static API key appended to the camera URL.
    pub api_key: String,

    /// Port for the `/metrics` endpoint in pull mode.
    pub http_port: u16,

    /// Seconds between poll cycles.
    pub refresh_rate: u64,

    /// Push to a gateway instead of serving `/metrics`.
    pub push: bool,

    /// Push gateway host (scheme optional).
    pub gateway: String,

    /// Push gateway port.
    pub gateway_port: u16,

    /// Job name used when pushing.
    pub job: String,

    /// Path for the metrics endpoint (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Per-request timeout for the camera API and the gateway (default: 10).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Log file, appended to alongside stdout.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/camerametrics.log")
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl RunContext {
    /// Load the given environment from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P, env: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, env)
    }

    /// Parse the given environment from a TOML string.
    pub fn parse(content: &str, env: &str) -> Result<Self, ConfigError> {
        let mut root: toml::Table = content.parse()?;

        let table = match root.remove(env) {
            Some(toml::Value::Table(table)) => table,
            Some(_) => {
                return Err(ConfigError::Validation(format!(
                    "Environment '{}' must be a table",
                    env
                )));
            }
            None => return Err(ConfigError::MissingEnvironment(env.to_string())),
        };

        if let Some(key) = REQUIRED_KEYS
            .iter()
            .copied()
            .find(|key| !table.contains_key(*key))
        {
            return Err(ConfigError::MissingKey {
                env: env.to_string(),
                key,
            });
        }

        let mut ctx: RunContext = toml::Value::Table(table).try_into()?;
        ctx.env = env.to_string();
        ctx.validate()?;
        Ok(ctx)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api_host must not be empty".to_string(),
            ));
        }

        if self.refresh_rate == 0 {
            return Err(ConfigError::Validation(
                "refresh_rate must be > 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.push && self.gateway.trim().is_empty() {
            return Err(ConfigError::Validation(
                "gateway must be set when push is enabled".to_string(),
            ));
        }

        if self.push && self.job.trim().is_empty() {
            return Err(ConfigError::Validation(
                "job must be set when push is enabled".to_string(),
            ));
        }

        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if [HEALTH_PATH, READY_PATH].contains(&self.metrics_path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not be {}, it is already served",
                self.metrics_path
            )));
        }

        Ok(())
    }

    /// Interval between poll cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_rate)
    }

    /// Timeout applied to each outgoing request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Address the pull endpoint binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.http_port))
    }
}
