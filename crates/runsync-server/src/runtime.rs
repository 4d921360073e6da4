use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use runsync_core::event::{Event, EventKind};

use crate::hub::{HubError, RunEmitter};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Runtime unavailable: {0}")]
    Unavailable(String),
}

/// A job accepted by the trigger endpoint.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub run_id: String,
    pub graph_id: String,
    pub graph_name: Option<String>,
    pub input: Value,
}

/// Executes jobs and reports their progress through a [`RunEmitter`].
///
/// `submit` must return quickly; the job itself runs in the background.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    async fn submit(&self, job: JobRequest, emitter: RunEmitter) -> Result<(), RuntimeError>;
}

const DEFAULT_NODES: [&str; 2] = ["start", "respond"];

/// Walks a straight line of nodes, streaming the prompt as chunks from the
/// last one.
///
/// Input: `{"nodes": ["a", "b"], "prompt": "text"}`, both optional. A node
/// whose id starts with `fail` errors and ends the run.
#[derive(Debug, Clone)]
pub struct LinearRuntime {
    step_delay: Duration,
}

impl Default for LinearRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRuntime {
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(20),
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

#[async_trait]
impl JobRuntime for LinearRuntime {
    async fn submit(&self, job: JobRequest, emitter: RunEmitter) -> Result<(), RuntimeError> {
        let nodes = parse_nodes(&job.input)?;
        let text = job
            .input
            .get("prompt")
            .or_else(|| job.input.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("done")
            .to_string();
        let delay = self.step_delay;

        tokio::spawn(async move {
            if let Err(e) = walk(&emitter, &nodes, &text, delay).await {
                warn!(run_id = emitter.run_id(), error = %e, "job aborted");
            }
        });
        Ok(())
    }
}

fn parse_nodes(input: &Value) -> Result<Vec<String>, RuntimeError> {
    let Some(raw) = input.get("nodes") else {
        return Ok(DEFAULT_NODES.iter().map(|s| s.to_string()).collect());
    };
    let list = raw
        .as_array()
        .ok_or_else(|| RuntimeError::InvalidInput("nodes must be an array".into()))?;
    let nodes: Vec<String> = list
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| RuntimeError::InvalidInput("node ids must be strings".into()))
        })
        .collect::<Result<_, _>>()?;
    if nodes.is_empty() {
        return Err(RuntimeError::InvalidInput("nodes must not be empty".into()));
    }
    Ok(nodes)
}

async fn walk(
    emitter: &RunEmitter,
    nodes: &[String],
    text: &str,
    delay: Duration,
) -> Result<(), HubError> {
    emitter
        .emit(Event::run_start(nodes.first().map(String::as_str)))
        .await?;

    for (i, node) in nodes.iter().enumerate() {
        tokio::time::sleep(delay).await;
        emitter
            .emit(Event::new(EventKind::NodeStart {
                node_id: node.clone(),
                node_name: Some(node.clone()),
                node_type: Some("step".into()),
            }))
            .await?;

        if node.starts_with("fail") {
            let message = format!("node {node} failed");
            emitter.emit(Event::node_error(node, &message)).await?;
            emitter.emit(Event::run_error(message)).await?;
            return Ok(());
        }

        emitter
            .emit(Event::new(EventKind::NodeProgress {
                node_id: node.clone(),
                label: Some("working".into()),
                current: Some(1),
                total: Some(1),
            }))
            .await?;

        let is_last = i + 1 == nodes.len();
        if is_last {
            for word in text.split_inclusive(' ') {
                emitter.emit(Event::chunk(word)).await?;
            }
        }

        let next = nodes.get(i + 1).map(String::as_str);
        emitter.emit(Event::node_complete(node, next)).await?;
        debug!(run_id = emitter.run_id(), node = %node, "node finished");
    }

    emitter.emit(Event::run_complete()).await?;
    Ok(())
}
