use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::correlator::DEFAULT_REQUEST_TIMEOUT;

/// Runtime configuration for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Identity of the app; fills `source` on actions and keys.
    pub app_id: String,
    /// Version stamped on freshly created app data.
    pub app_version: String,
    /// Bound on config and user-input lookups.
    pub request_timeout: Duration,
    /// Bound on cache-miss reads of data, app data, and settings.
    pub fetch_timeout: Duration,
}

impl RuntimeConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_version: "0.0.0".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            fetch_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            app_id: env::var("TETHER_APP_ID").context("TETHER_APP_ID must be set")?,
            app_version: env::var("TETHER_APP_VERSION").unwrap_or_else(|_| "0.0.0".to_string()),
            request_timeout: millis_from_env("TETHER_REQUEST_TIMEOUT_MS")?,
            fetch_timeout: millis_from_env("TETHER_FETCH_TIMEOUT_MS")?,
        })
    }
}

fn millis_from_env(name: &str) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .with_context(|| format!("{name} must be a whole number of milliseconds")),
        Err(_) => Ok(DEFAULT_REQUEST_TIMEOUT),
    }
}
