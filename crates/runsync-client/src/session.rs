use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use runsync_core::event::Event;
use runsync_core::reconciler::{EventReconciler, Generation, Outcome};
use runsync_core::state::RunState;

use crate::error::Result;
use crate::stream::EventStream;

struct Inner {
    reconciler: Mutex<EventReconciler>,
    publisher: watch::Sender<Arc<RunState>>,
}

/// Shared owner of one [`EventReconciler`].
///
/// Every change is published as a fresh `Arc<RunState>`; subscribers and
/// [`RunSession::current`] only ever see complete values. Cloning the
/// session shares the same reconciler.
#[derive(Clone)]
pub struct RunSession {
    inner: Arc<Inner>,
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSession {
    pub fn new() -> Self {
        Self::with_reconciler(EventReconciler::new())
    }

    pub fn with_reconciler(reconciler: EventReconciler) -> Self {
        let (publisher, _) = watch::channel(Arc::new(reconciler.state().clone()));
        Self {
            inner: Arc::new(Inner {
                reconciler: Mutex::new(reconciler),
                publisher,
            }),
        }
    }

    /// Receive every published state. The receiver starts at the current one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RunState>> {
        self.inner.publisher.subscribe()
    }

    /// Point-in-time read outside the notification path.
    pub fn current(&self) -> Arc<RunState> {
        self.inner.publisher.borrow().clone()
    }

    pub fn execution_path(&self) -> Vec<String> {
        self.current().execution_path.clone()
    }

    pub fn generation(&self) -> Generation {
        self.lock().generation()
    }

    pub fn start_run(
        &self,
        run_id: &str,
        graph_id: Option<String>,
        graph_name: Option<String>,
    ) -> Generation {
        let mut reconciler = self.lock();
        let generation = reconciler.start_run(run_id, graph_id, graph_name);
        self.publish(&reconciler);
        generation
    }

    pub fn resume(&self, run_id: &str) -> Generation {
        let mut reconciler = self.lock();
        let generation = reconciler.resume(run_id);
        self.publish(&reconciler);
        generation
    }

    pub fn reset(&self) -> Generation {
        let mut reconciler = self.lock();
        let generation = reconciler.reset();
        self.publish(&reconciler);
        generation
    }

    pub fn load_historical(&self, state: RunState) -> Generation {
        let mut reconciler = self.lock();
        let generation = reconciler.load_historical(state);
        self.publish(&reconciler);
        generation
    }

    /// Stop applying events from the reader attached at `generation`.
    /// Does nothing if a newer reader has already taken over.
    pub fn detach(&self, generation: Generation) {
        let mut reconciler = self.lock();
        if reconciler.generation() == generation {
            reconciler.detach();
        }
    }

    pub fn apply(&self, generation: Generation, event: Event) -> Outcome {
        let mut reconciler = self.lock();
        let outcome = reconciler.ingest(generation, event);
        if outcome.changed() {
            self.publish(&reconciler);
        }
        outcome
    }

    pub fn fail_trigger(&self, generation: Generation, message: &str) -> Outcome {
        let mut reconciler = self.lock();
        let outcome = reconciler.fail_trigger(generation, message);
        if outcome.changed() {
            self.publish(&reconciler);
        }
        outcome
    }

    /// Called when a reader's stream ends. If no snapshot ever arrived,
    /// bootstrap from what was buffered rather than discard it.
    pub fn finish(&self, generation: Generation) {
        let mut reconciler = self.lock();
        if reconciler.generation() != generation || !reconciler.is_buffering() {
            return;
        }
        if let Some(outcome) = reconciler.bootstrap_from_buffer() {
            debug!(?outcome, "stream ended before snapshot, bootstrapped from buffer");
            if outcome.changed() {
                self.publish(&reconciler);
            }
        }
    }

    /// Drive `stream` into the reconciler until it ends or is cancelled.
    pub async fn pump(&self, generation: Generation, mut stream: EventStream) -> Result<()> {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    self.apply(generation, event);
                }
                Err(e) => {
                    warn!(error = %e, generation, "event stream failed");
                    return Err(e);
                }
            }
        }
        self.finish(generation);
        info!(generation, cancelled = stream.is_cancelled(), "event stream closed");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, EventReconciler> {
        self.inner
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, reconciler: &EventReconciler) {
        self.inner
            .publisher
            .send_replace(Arc::new(reconciler.state().clone()));
    }
}

impl std::fmt::Debug for RunSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSession")
            .field("state", &self.current())
            .finish()
    }
}
