use std::time::Duration;

use crate::error::{ClientError, Result};

const RUN_ID_PLACEHOLDER: &str = "{run_id}";

/// Endpoints and limits for talking to a runsync server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host, and port, without a trailing slash.
    pub base_url: String,
    /// Path of the job-submission endpoint.
    pub trigger_path: String,
    /// Path of the event stream; `{run_id}` is substituted.
    pub stream_path: String,
    /// Path of the persisted run state; `{run_id}` is substituted.
    pub state_path: String,
    pub connect_timeout: Duration,
    /// Cap on events buffered while waiting for a snapshot. Unbounded if unset.
    pub buffer_limit: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".into(),
            trigger_path: "/api/runs".into(),
            stream_path: "/api/runs/{run_id}/stream".into(),
            state_path: "/api/runs/{run_id}".into(),
            connect_timeout: Duration::from_secs(10),
            buffer_limit: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RUNSYNC_BASE_URL`,
    /// `RUNSYNC_CONNECT_TIMEOUT_SECS`, and `RUNSYNC_BUFFER_LIMIT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("RUNSYNC_BASE_URL") {
            config = config.with_base_url(url);
        }
        if let Ok(secs) = std::env::var("RUNSYNC_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ClientError::Config(format!("RUNSYNC_CONNECT_TIMEOUT_SECS: not a number: {secs}"))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Ok(limit) = std::env::var("RUNSYNC_BUFFER_LIMIT") {
            let limit: usize = limit.parse().map_err(|_| {
                ClientError::Config(format!("RUNSYNC_BUFFER_LIMIT: not a number: {limit}"))
            })?;
            config.buffer_limit = Some(limit);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    pub fn trigger_url(&self) -> String {
        format!("{}{}", self.base_url, self.trigger_path)
    }

    pub fn stream_url(&self, run_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.stream_path.replace(RUN_ID_PLACEHOLDER, run_id)
        )
    }

    pub fn state_url(&self, run_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.state_path.replace(RUN_ID_PLACEHOLDER, run_id)
        )
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))
    }
}
