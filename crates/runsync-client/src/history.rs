use reqwest::StatusCode;
use tracing::debug;

use runsync_core::reconciler::Generation;
use runsync_core::state::RunState;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::RunSession;

/// Loads persisted, finished runs without touching the live event path.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HistoryClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = config.http_client()?;
        Ok(Self { http, config })
    }

    /// Fetch the stored state of `run_id`. Runs that have not reached a
    /// terminal state are rejected; those belong on the live stream.
    pub async fn load(&self, run_id: &str) -> Result<RunState> {
        let url = self.config.state_url(run_id);
        debug!(run_id, url = %url, "loading historical run");
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(ClientError::NotFound(run_id.to_string())),
            status if !status.is_success() => {
                return Err(ClientError::Transport(format!(
                    "state endpoint for {run_id} returned {status}"
                )));
            }
            _ => {}
        }
        let state: RunState = response.json().await?;
        ensure_terminal(run_id, &state)?;
        Ok(state)
    }

    /// Fetch `run_id` and install it into `session` as an immutable run.
    pub async fn load_into(&self, run_id: &str, session: &RunSession) -> Result<Generation> {
        let state = self.load(run_id).await?;
        Ok(session.load_historical(state))
    }
}

fn ensure_terminal(run_id: &str, state: &RunState) -> Result<()> {
    if state.is_terminal() {
        Ok(())
    } else {
        Err(ClientError::NotTerminal(run_id.to_string()))
    }
}
