//! Pure per-event state transitions.
//!
//! [`apply`] is the reference form `(state, event) -> state`; [`fold`] is the
//! in-place variant the reconciler uses. Neither looks at run ids, buffering,
//! or low-water marks: that filtering happens in the reconciler before an
//! event reaches this module.

use crate::event::{Event, EventKind};
use crate::state::{NodeProgress, NodeStatus, RunState, RunStatus};

const DEFAULT_NODE_ERROR: &str = "Node execution failed";
const DEFAULT_RUN_ERROR: &str = "Run failed";

/// Return the state that results from applying `event` to `state`.
pub fn apply(state: &RunState, event: &Event) -> RunState {
    let mut next = state.clone();
    fold(&mut next, event);
    next
}

/// Apply `event` in place. Returns whether anything changed.
///
/// A terminal run absorbs every event.
pub fn fold(state: &mut RunState, event: &Event) -> bool {
    if state.status.is_terminal() {
        return false;
    }
    let ts = event.timestamp;

    match &event.kind {
        EventKind::RunStart { entry_node_id } => {
            let same_run = match (&state.run_id, &event.run_id) {
                (Some(current), Some(incoming)) => current == incoming,
                _ => true,
            };
            if !same_run {
                *state = RunState::idle();
            }
            if event.run_id.is_some() {
                state.run_id = event.run_id.clone();
            }
            adopt_graph(state, event);
            state.status = state.status.advance(RunStatus::Running);
            state.started_at = state.started_at.or(ts);
            if let Some(entry) = entry_node_id {
                if state.execution_path.is_empty() {
                    state.push_path(entry);
                    state.node_entry(entry);
                }
            }
            true
        }
        EventKind::NodeStart {
            node_id,
            node_name,
            node_type,
        } => {
            adopt_graph(state, event);
            state.status = state.status.advance(RunStatus::Running);
            let node = state.node_entry(node_id);
            node.status = NodeStatus::Running;
            node.started_at = ts.or(node.started_at);
            node.completed_at = None;
            node.error = None;
            node.progress = None;
            if node_name.is_some() {
                node.name = node_name.clone();
            }
            if node_type.is_some() {
                node.node_type = node_type.clone();
            }
            state.push_path(node_id);
            state.current_node_id = Some(node_id.clone());
            true
        }
        EventKind::NodeProgress {
            node_id,
            label,
            current,
            total,
        } => {
            let Some(node) = state.nodes.get_mut(node_id) else {
                return false;
            };
            if node.status != NodeStatus::Running {
                return false;
            }
            let progress = node.progress.get_or_insert_with(NodeProgress::default);
            if label.is_some() {
                progress.label = label.clone();
            }
            if current.is_some() {
                progress.current = *current;
            }
            if total.is_some() {
                progress.total = *total;
            }
            true
        }
        EventKind::NodeComplete {
            node_id,
            next_node_id,
        } => {
            let node = state.node_entry(node_id);
            node.status = NodeStatus::Completed;
            node.completed_at = ts.or(node.completed_at);
            if state.current_node_id.as_deref() == Some(node_id.as_str()) {
                state.current_node_id = next_node_id.clone();
            }
            true
        }
        EventKind::NodeError { node_id, error } => {
            let node = state.node_entry(node_id);
            node.status = NodeStatus::Error;
            node.completed_at = ts.or(node.completed_at);
            node.error = Some(
                error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NODE_ERROR.to_string()),
            );
            true
        }
        EventKind::Chunk { chunk } => {
            state.content.push_str(chunk);
            !chunk.is_empty()
        }
        EventKind::ThinkingChunk { chunk } => {
            state.thinking.push_str(chunk);
            !chunk.is_empty()
        }
        EventKind::RunComplete => {
            state.status = RunStatus::Completed;
            state.current_node_id = None;
            state.completed_at = ts.or(state.completed_at);
            true
        }
        EventKind::RunError { error } => {
            state.status = RunStatus::Error;
            state.error = Some(
                error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RUN_ERROR.to_string()),
            );
            state.completed_at = ts.or(state.completed_at);
            true
        }
        EventKind::Init { state: snapshot } => {
            *state = state.merge_snapshot(snapshot);
            true
        }
    }
}

fn adopt_graph(state: &mut RunState, event: &Event) {
    if state.graph_id.is_none() {
        state.graph_id = event.graph_id.clone();
    }
    if state.graph_name.is_none() {
        state.graph_name = event.graph_name.clone();
    }
}
