//! Typed configuration from environment variables, with an optional TOML
//! overlay for retry and timeout tuning.
//!
//! Loads once at startup and fails fast on malformed values. Sensitive values
//! are wrapped in `secrecy::SecretString` to keep them out of logs.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::collaborator::{CallTimeouts, Endpoints};
use crate::error::{Error, Result};
use crate::resilience::RetryPolicy;

#[derive(Debug)]
pub struct Config {
    /// Postgres URL for the durable task store.
    pub database_url: Option<SecretString>,
    pub bind_addr: SocketAddr,
    pub endpoints: Endpoints,
    /// pgmq queue that receives completion messages. None logs them instead.
    pub results_queue: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub retry: RetryPolicy,
    pub timeouts: CallTimeouts,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let bind_addr = optional_var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8084".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("BIND_ADDR is not a socket address: {e}")))?;

        Ok(Self {
            database_url: optional_var("DATABASE_URL").map(SecretString::from),
            bind_addr,
            endpoints: Endpoints {
                data_fetch_url: url_var("DATA_FETCH_URL", "http://report-reader-agent:8081")?,
                inference_url: url_var("INFERENCE_URL", "http://logic-understanding-agent:8082")?,
                chart_url: url_var("CHART_URL", "http://visualization-agent:8083")?,
                token: optional_var("COLLABORATOR_TOKEN").map(SecretString::from),
            },
            results_queue: optional_var("RESULTS_QUEUE"),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            retry: RetryPolicy::default(),
            timeouts: CallTimeouts::default(),
        })
    }

    /// Apply a TOML overlay file on top of the environment configuration.
    pub fn with_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let overlay: FileOverlay = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;
        overlay.apply(&mut self);
        Ok(self)
    }
}

/// Top-level TOML layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOverlay {
    #[serde(default)]
    resilience: Option<ResilienceSection>,
    #[serde(default)]
    timeouts: Option<TimeoutSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResilienceSection {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutSection {
    data_fetch_secs: Option<u64>,
    inference_secs: Option<u64>,
    chart_secs: Option<u64>,
}

impl FileOverlay {
    fn apply(self, config: &mut Config) {
        if let Some(r) = self.resilience {
            let current = &config.retry;
            config.retry = RetryPolicy::new(
                r.max_attempts.unwrap_or(current.max_attempts),
                r.base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(current.base_delay),
                r.max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(current.max_delay),
            );
        }
        if let Some(t) = self.timeouts {
            if let Some(secs) = t.data_fetch_secs {
                config.timeouts.data_fetch = Duration::from_secs(secs);
            }
            if let Some(secs) = t.inference_secs {
                config.timeouts.inference = Duration::from_secs(secs);
            }
            if let Some(secs) = t.chart_secs {
                config.timeouts.chart = Duration::from_secs(secs);
            }
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn url_var(name: &str, default: &str) -> Result<String> {
    let value = optional_var(name).unwrap_or_else(|| default.to_string());
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(Error::Config(format!(
            "{name} must be an http(s) URL, got {value:?}"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}
