//! Folding a live event stream into a consistent [`RunState`].
//!
//! The reconciler owns the state and a FIFO buffer of not-yet-applied
//! events. It resolves three races on top of the pure reducer:
//!
//! * events that arrive before the reader knows what run it is watching are
//!   buffered until a snapshot (`init`) arrives, or bootstrapped from the
//!   first structural event when no snapshot is expected;
//! * after a snapshot, events at or before its `stateTimestamp` (the
//!   low-water mark) are dropped and later ones are replayed in arrival
//!   order;
//! * events for another run id, or delivered by a reader whose generation
//!   has been superseded, are ignored.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::event::{Event, EventKind};
use crate::reducer;
use crate::state::{RunState, RunStatus, Snapshot};

/// Token identifying one attachment of a reader to the reconciler.
///
/// Bumped by every `start_run`, `resume`, `reset`, `detach`, and
/// `load_historical`; events stamped with an older value are discarded.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    StaleGeneration,
    ForeignRun,
    BelowLowWaterMark,
    StaleSnapshot,
    Terminal,
}

/// What happened to one ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The state changed.
    Applied,
    /// Accepted but had no effect on the state.
    Unchanged,
    /// Held back until a snapshot or a bootstrap boundary arrives.
    Buffered,
    Dropped(DropReason),
}

impl Outcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No run is known yet. The first structural event bootstraps a state.
    Unbound,
    /// A reader re-attached to a known run; everything waits for `init`.
    AwaitingSnapshot,
    /// Events are applied as they arrive.
    Live,
}

#[derive(Debug)]
pub struct EventReconciler {
    state: RunState,
    tracked_run: Option<String>,
    generation: Generation,
    phase: Phase,
    low_water_mark: Option<i64>,
    buffer: VecDeque<Event>,
    buffer_limit: Option<usize>,
    overflowed: usize,
}

impl Default for EventReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReconciler {
    pub fn new() -> Self {
        Self {
            state: RunState::idle(),
            tracked_run: None,
            generation: 0,
            phase: Phase::Unbound,
            low_water_mark: None,
            buffer: VecDeque::new(),
            buffer_limit: None,
            overflowed: 0,
        }
    }

    /// Cap the pre-snapshot buffer. On overflow the oldest entry is dropped.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit.max(1));
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn tracked_run(&self) -> Option<&str> {
        self.tracked_run.as_deref()
    }

    pub fn low_water_mark(&self) -> Option<i64> {
        self.low_water_mark
    }

    pub fn is_buffering(&self) -> bool {
        self.phase != Phase::Live
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of buffered events discarded because the buffer was full.
    pub fn overflowed(&self) -> usize {
        self.overflowed
    }

    /// Declare a fresh run. The optimistic `starting` state is installed and
    /// events are applied immediately, without waiting for a snapshot.
    pub fn start_run(
        &mut self,
        run_id: impl Into<String>,
        graph_id: Option<String>,
        graph_name: Option<String>,
    ) -> Generation {
        let run_id = run_id.into();
        self.state = RunState::starting(run_id.clone(), graph_id, graph_name);
        self.enter(Some(run_id), Phase::Live);
        self.low_water_mark = None;
        self.generation
    }

    /// Re-attach to `run_id` (reconnect or late join). Progress already
    /// known for the same run is kept; events wait for the next snapshot.
    pub fn resume(&mut self, run_id: impl Into<String>) -> Generation {
        let run_id = run_id.into();
        if self.state.run_id.as_deref() != Some(run_id.as_str()) {
            self.state = RunState::idle();
            self.low_water_mark = None;
        }
        self.enter(Some(run_id), Phase::AwaitingSnapshot);
        self.generation
    }

    /// Forget everything.
    pub fn reset(&mut self) -> Generation {
        self.state = RunState::idle();
        self.low_water_mark = None;
        self.enter(None, Phase::Unbound);
        self.generation
    }

    /// Invalidate the current reader without touching the state. Used on
    /// cancellation so events already read but not yet applied are dropped.
    pub fn detach(&mut self) -> Generation {
        self.generation += 1;
        self.buffer.clear();
        self.generation
    }

    /// Install a persisted, already-finished state. No live events follow.
    pub fn load_historical(&mut self, state: RunState) -> Generation {
        let run_id = state.run_id.clone();
        self.state = state;
        self.low_water_mark = None;
        self.enter(run_id, Phase::Live);
        self.generation
    }

    fn enter(&mut self, run_id: Option<String>, phase: Phase) {
        self.generation += 1;
        self.tracked_run = run_id;
        self.phase = phase;
        self.buffer.clear();
        self.overflowed = 0;
    }

    /// Feed one event read by the reader attached at `generation`.
    pub fn ingest(&mut self, generation: Generation, event: Event) -> Outcome {
        if generation != self.generation {
            debug!(
                event = event.name(),
                generation,
                current = self.generation,
                "dropping event from superseded reader"
            );
            return Outcome::Dropped(DropReason::StaleGeneration);
        }
        if !self.accepts_run(event.run_id.as_deref()) {
            debug!(
                event = event.name(),
                run_id = event.run_id.as_deref().unwrap_or_default(),
                "dropping event for another run"
            );
            return Outcome::Dropped(DropReason::ForeignRun);
        }

        if let EventKind::Init { state } = event.kind {
            return self.ingest_snapshot(state);
        }

        match self.phase {
            Phase::Live => self.apply_live(&event),
            Phase::Unbound if event.is_structural() => self.bootstrap(event),
            Phase::Unbound | Phase::AwaitingSnapshot => {
                self.enqueue(event);
                Outcome::Buffered
            }
        }
    }

    /// Report that the trigger request failed. Applied only if the run has
    /// not already reached a terminal state: the first terminal signal wins.
    pub fn fail_trigger(&mut self, generation: Generation, message: impl Into<String>) -> Outcome {
        if generation != self.generation {
            return Outcome::Dropped(DropReason::StaleGeneration);
        }
        if self.state.is_terminal() {
            debug!(
                status = %self.state.status,
                "ignoring trigger failure after terminal state"
            );
            return Outcome::Dropped(DropReason::Terminal);
        }
        self.state.status = RunStatus::Error;
        self.state.error = Some(message.into());
        self.state.current_node_id = None;
        Outcome::Applied
    }

    /// Give up waiting for a snapshot and bootstrap from the first buffered
    /// structural event. Returns `None` when nothing is buffered that could
    /// serve as a boundary.
    pub fn bootstrap_from_buffer(&mut self) -> Option<Outcome> {
        if self.phase == Phase::Live {
            return None;
        }
        let position = self.buffer.iter().position(|e| {
            e.is_structural() && self.accepts_run(e.run_id.as_deref())
        })?;
        let boundary = self.buffer.remove(position)?;
        Some(self.bootstrap(boundary))
    }

    fn accepts_run(&self, run_id: Option<&str>) -> bool {
        match (self.tracked_run.as_deref(), run_id) {
            (Some(tracked), Some(incoming)) => tracked == incoming,
            _ => true,
        }
    }

    fn ingest_snapshot(&mut self, snapshot: Snapshot) -> Outcome {
        if !self.accepts_run(Some(&snapshot.run_id)) {
            return Outcome::Dropped(DropReason::ForeignRun);
        }
        if let Some(mark) = self.low_water_mark {
            if snapshot.state_timestamp < mark {
                debug!(
                    state_timestamp = snapshot.state_timestamp,
                    mark, "dropping snapshot older than the current one"
                );
                return Outcome::Dropped(DropReason::StaleSnapshot);
            }
        }

        self.state = self.state.merge_snapshot(&snapshot);
        self.tracked_run = Some(snapshot.run_id.clone());
        self.low_water_mark = Some(snapshot.state_timestamp);
        self.phase = Phase::Live;
        self.drain();
        Outcome::Applied
    }

    /// Synthesize a state from `boundary` as if it were the snapshot, then
    /// replay whatever was buffered before it.
    fn bootstrap(&mut self, boundary: Event) -> Outcome {
        let run_id = boundary.run_id.clone().or_else(|| self.tracked_run.clone());
        debug!(
            event = boundary.name(),
            run_id = run_id.as_deref().unwrap_or_default(),
            buffered = self.buffer.len(),
            "bootstrapping run state without snapshot"
        );
        if run_id.is_some() && self.state.run_id == run_id {
            // Progress held from before a resume is kept; a terminal
            // status stays terminal.
            self.state.status = self.state.status.advance(RunStatus::Running);
            if self.state.graph_id.is_none() {
                self.state.graph_id = boundary.graph_id.clone();
                self.state.graph_name = boundary.graph_name.clone();
            }
        } else {
            self.state = RunState {
                run_id: run_id.clone(),
                graph_id: boundary.graph_id.clone(),
                graph_name: boundary.graph_name.clone(),
                status: RunStatus::Running,
                ..RunState::idle()
            };
            self.low_water_mark = None;
        }
        self.tracked_run = run_id;
        self.phase = Phase::Live;
        if self.state.is_terminal() {
            let discarded = std::mem::take(&mut self.buffer).len() + 1;
            debug!(discarded, "run already finished, discarding buffered events");
            return Outcome::Dropped(DropReason::Terminal);
        }
        let outcome = self.apply_live(&boundary);
        self.drain();
        match outcome {
            Outcome::Unchanged => Outcome::Applied,
            other => other,
        }
    }

    fn drain(&mut self) {
        let pending = std::mem::take(&mut self.buffer);
        for event in pending {
            if !self.accepts_run(event.run_id.as_deref()) {
                continue;
            }
            self.apply_live(&event);
        }
    }

    fn apply_live(&mut self, event: &Event) -> Outcome {
        if let (Some(mark), Some(ts)) = (self.low_water_mark, event.timestamp) {
            if ts <= mark {
                debug!(event = event.name(), ts, mark, "event already reflected in snapshot");
                return Outcome::Dropped(DropReason::BelowLowWaterMark);
            }
        }
        if self.state.is_terminal() {
            return Outcome::Dropped(DropReason::Terminal);
        }
        if self.tracked_run.is_none() && event.run_id.is_some() {
            self.tracked_run = event.run_id.clone();
            if self.state.run_id.is_none() {
                self.state.run_id = event.run_id.clone();
            }
        }
        if reducer::fold(&mut self.state, event) {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        }
    }

    fn enqueue(&mut self, event: Event) {
        if let Some(limit) = self.buffer_limit {
            if self.buffer.len() >= limit {
                self.buffer.pop_front();
                self.overflowed += 1;
                warn!(limit, overflowed = self.overflowed, "event buffer full, dropping oldest");
            }
        }
        self.buffer.push_back(event);
    }
}
