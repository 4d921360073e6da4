use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use runsync_core::reconciler::{EventReconciler, Generation};
use runsync_core::state::RunState;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::RunSession;
use crate::stream::{CancelHandle, EventStreamClient};

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Caller-chosen run id. A UUID v4 is generated when absent.
    pub run_id: Option<String>,
    pub graph_id: String,
    pub graph_name: Option<String>,
    pub input: Value,
}

impl RunParams {
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            ..Self::default()
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        self.graph_name = Some(name.into());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Body of the job-submission request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest<'a> {
    run_id: &'a str,
    graph_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph_name: Option<&'a str>,
    input: &'a Value,
}

/// Final result of one attached reader.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: Arc<RunState>,
    /// The stream failed mid-read.
    pub transport_error: Option<ClientError>,
    /// The job-submission request failed.
    pub trigger_error: Option<ClientError>,
}

/// A run whose stream is being read in the background.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    generation: Generation,
    cancel: CancelHandle,
    session: RunSession,
    reader: JoinHandle<Result<()>>,
    trigger: Option<JoinHandle<Result<()>>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Stop reading and stop applying anything already read.
    ///
    /// Idempotent, and a no-op once the stream has finished or a newer run
    /// has taken over the session.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.session.detach(self.generation);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the reader (and the trigger request, if any) to finish.
    pub async fn finished(self) -> RunOutcome {
        let transport_error = join(self.reader).await.err();
        let trigger_error = match self.trigger {
            Some(task) => join(task).await.err(),
            None => None,
        };
        RunOutcome {
            state: self.session.current(),
            transport_error,
            trigger_error,
        }
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(ClientError::Transport(format!("reader task failed: {e}"))),
    }
}

/// Starts runs: stream first, then the trigger request.
#[derive(Debug, Clone)]
pub struct RunTrigger {
    http: reqwest::Client,
    config: ClientConfig,
    streams: EventStreamClient,
    session: RunSession,
}

impl RunTrigger {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut reconciler = EventReconciler::new();
        if let Some(limit) = config.buffer_limit {
            reconciler = reconciler.with_buffer_limit(limit);
        }
        Self::with_session(config, RunSession::with_reconciler(reconciler))
    }

    pub fn with_session(config: ClientConfig, session: RunSession) -> Result<Self> {
        let http = config.http_client()?;
        Ok(Self {
            streams: EventStreamClient::with_http(http.clone(), config.clone()),
            http,
            config,
            session,
        })
    }

    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Start a run.
    ///
    /// The event stream is opened before the trigger request is sent so no
    /// early event can be missed. If the stream cannot be opened the run is
    /// not started and the session is left untouched. The trigger request is
    /// not awaited. If it fails before the run reached a terminal state
    /// through the stream, the failure becomes the run's error and the
    /// stream is closed.
    pub async fn start_run(&self, params: RunParams) -> Result<RunHandle> {
        let run_id = params
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let stream = self.streams.open(&run_id).await?;
        let generation = self.session.start_run(
            &run_id,
            Some(params.graph_id.clone()),
            params.graph_name.clone(),
        );
        info!(run_id, graph_id = %params.graph_id, generation, "run started");

        let cancel = stream.cancel_handle();
        let reader = tokio::spawn({
            let session = self.session.clone();
            async move { session.pump(generation, stream).await }
        });
        let trigger = tokio::spawn(submit(
            self.http.clone(),
            self.config.trigger_url(),
            run_id.clone(),
            params,
            self.session.clone(),
            generation,
            cancel.clone(),
        ));

        Ok(RunHandle {
            run_id,
            generation,
            cancel,
            session: self.session.clone(),
            reader,
            trigger: Some(trigger),
        })
    }

    /// Attach to a run that is already executing (late join or reconnect).
    /// Events wait for the server's snapshot before being applied.
    pub async fn attach(&self, run_id: &str) -> Result<RunHandle> {
        let stream = self.streams.open(run_id).await?;
        let generation = self.session.resume(run_id);
        info!(run_id, generation, "attached to run");

        let cancel = stream.cancel_handle();
        let reader = tokio::spawn({
            let session = self.session.clone();
            async move { session.pump(generation, stream).await }
        });

        Ok(RunHandle {
            run_id: run_id.to_string(),
            generation,
            cancel,
            session: self.session.clone(),
            reader,
            trigger: None,
        })
    }
}

async fn submit(
    http: reqwest::Client,
    url: String,
    run_id: String,
    params: RunParams,
    session: RunSession,
    generation: Generation,
    stream: CancelHandle,
) -> Result<()> {
    let body = TriggerRequest {
        run_id: &run_id,
        graph_id: &params.graph_id,
        graph_name: params.graph_name.as_deref(),
        input: &params.input,
    };

    let error = match http.post(&url).json(&body).send().await {
        Ok(response) if response.status().is_success() => return Ok(()),
        Ok(response) => {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            ClientError::Trigger(format!("{status}: {}", error_message(&text)))
        }
        Err(e) => ClientError::Trigger(e.to_string()),
    };

    warn!(run_id = %run_id, error = %error, "trigger request failed");
    if session.fail_trigger(generation, &error.to_string()).changed() {
        // The run is settled; a server that never accepted it will not
        // close the stream on its own.
        stream.cancel();
    }
    Err(error)
}

/// Pull `error` out of a JSON error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}
