//! Per-run fan-out of events with join-time snapshots.
//!
//! The hub keeps an authoritative [`RunState`] for every run, folded with
//! the same reducer the clients use, so a reader that joins mid-run gets an
//! `init` snapshot followed by exactly the events published after it.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use runsync_core::event::Event;
use runsync_core::reducer;
use runsync_core::state::{RunState, RunStatus, Snapshot};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Run already exists: {0}")]
    Duplicate(String),

    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Run already finished: {0}")]
    Finished(String),
}

struct RunEntry {
    state: RunState,
    last_timestamp: i64,
    registered: bool,
    sender: broadcast::Sender<Event>,
}

impl RunEntry {
    fn new(run_id: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: RunState {
                run_id: Some(run_id.to_string()),
                ..RunState::idle()
            },
            last_timestamp: 0,
            registered: false,
            sender,
        }
    }

    /// Producer timestamps must be strictly increasing per run: a snapshot's
    /// `stateTimestamp` equals the last folded event's, and readers drop
    /// anything at or below it.
    fn next_timestamp(&mut self, requested: Option<i64>) -> i64 {
        let ts = requested
            .unwrap_or_else(now_millis)
            .max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }
}

/// What a joining reader receives.
pub struct Join {
    /// `None` while the run has not been registered yet.
    pub snapshot: Option<Snapshot>,
    pub receiver: broadcast::Receiver<Event>,
}

#[derive(Clone)]
pub struct RunHub {
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
    capacity: usize,
}

impl Default for RunHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RunHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow reader may fall behind before it is
    /// disconnected.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Record a triggered run. Readers may already be waiting on it.
    pub async fn register(
        &self,
        run_id: &str,
        graph_id: &str,
        graph_name: Option<String>,
    ) -> Result<(), HubError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .entry(run_id.to_string())
            .or_insert_with(|| RunEntry::new(run_id, self.capacity));
        if entry.registered {
            return Err(HubError::Duplicate(run_id.to_string()));
        }
        entry.registered = true;
        entry.state.graph_id = Some(graph_id.to_string());
        entry.state.graph_name = graph_name;
        entry.state.status = entry.state.status.advance(RunStatus::Starting);
        info!(run_id, graph_id, "run registered");
        Ok(())
    }

    /// Subscribe to `run_id`. The snapshot and the subscription are taken
    /// under one lock, so no event falls between them.
    pub async fn join(&self, run_id: &str) -> Join {
        let mut runs = self.runs.write().await;
        let entry = runs
            .entry(run_id.to_string())
            .or_insert_with(|| RunEntry::new(run_id, self.capacity));
        let snapshot = entry
            .registered
            .then(|| Snapshot::of(&entry.state, run_id, entry.last_timestamp));
        debug!(run_id, has_snapshot = snapshot.is_some(), "reader joined");
        Join {
            snapshot,
            receiver: entry.sender.subscribe(),
        }
    }

    /// Stamp, fold, and fan out one event. Returns the event as sent.
    pub async fn publish(&self, run_id: &str, mut event: Event) -> Result<Event, HubError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(run_id)
            .filter(|e| e.registered)
            .ok_or_else(|| HubError::NotFound(run_id.to_string()))?;
        if entry.state.is_terminal() {
            return Err(HubError::Finished(run_id.to_string()));
        }

        event.run_id = Some(run_id.to_string());
        event.timestamp = Some(entry.next_timestamp(event.timestamp));
        if event.graph_id.is_none() {
            event.graph_id = entry.state.graph_id.clone();
        }
        reducer::fold(&mut entry.state, &event);

        let receivers = entry.sender.send(event.clone()).unwrap_or(0);
        debug!(run_id, event = event.name(), receivers, "event published");
        if entry.state.is_terminal() {
            info!(run_id, status = %entry.state.status, "run finished");
        }
        Ok(event)
    }

    /// Current state of a registered run.
    pub async fn state(&self, run_id: &str) -> Option<RunState> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .filter(|e| e.registered)
            .map(|e| e.state.clone())
    }

    pub fn emitter(&self, run_id: &str) -> RunEmitter {
        RunEmitter {
            hub: self.clone(),
            run_id: run_id.to_string(),
        }
    }
}

/// Handle a job runtime uses to report progress for one run.
#[derive(Clone)]
pub struct RunEmitter {
    hub: RunHub,
    run_id: String,
}

impl RunEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn emit(&self, event: Event) -> Result<Event, HubError> {
        self.hub.publish(&self.run_id, event).await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
