use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle of a whole run.
///
/// Transitions only move forward: `idle → starting → running →
/// {completed | error}`. See [`RunStatus::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Completed | Self::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Move towards `next`, never backwards. A terminal status absorbs
    /// every later transition, including the other terminal status.
    pub fn advance(self, next: RunStatus) -> RunStatus {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single node within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl NodeStatus {
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }
}

/// Step label and counters reported by `node_progress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<NodeProgress>,
}

impl NodeState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: None,
            node_type: None,
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            progress: None,
        }
    }
}

/// Execution progress of one run as seen by a client.
///
/// Values are replaced wholesale on every update; readers holding an older
/// value never observe a partial mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub graph_name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeState>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl RunState {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Optimistic state for a run the caller has just asked for.
    pub fn starting(
        run_id: impl Into<String>,
        graph_id: Option<String>,
        graph_name: Option<String>,
    ) -> Self {
        Self {
            run_id: Some(run_id.into()),
            graph_id,
            graph_name,
            status: RunStatus::Starting,
            ..Self::default()
        }
    }

    /// Materialize a state directly from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::idle().merge_snapshot(snapshot)
    }

    /// Fold a snapshot into this state.
    ///
    /// A snapshot for a different run replaces the state outright. For the
    /// same run, node statuses only move forward, the snapshot's path order
    /// wins and locally known nodes missing from it are kept at the tail,
    /// and accumulated text is preserved since snapshots do not carry it.
    pub fn merge_snapshot(&self, snapshot: &Snapshot) -> Self {
        let mut next = match &self.run_id {
            Some(id) if *id != snapshot.run_id => Self::idle(),
            _ => self.clone(),
        };

        next.run_id = Some(snapshot.run_id.clone());
        if snapshot.graph_id.is_some() {
            next.graph_id = snapshot.graph_id.clone();
        }
        if snapshot.graph_name.is_some() {
            next.graph_name = snapshot.graph_name.clone();
        }
        next.status = next.status.advance(snapshot.status);

        let mut path = Vec::with_capacity(snapshot.execution_path.len() + next.execution_path.len());
        for id in snapshot.execution_path.iter().chain(next.execution_path.iter()) {
            if !path.contains(id) {
                path.push(id.clone());
            }
        }
        next.execution_path = path;

        for (id, remote) in &snapshot.node_progress {
            let node = next
                .nodes
                .entry(id.clone())
                .or_insert_with(|| NodeState::new(id.clone()));
            if remote.node_name.is_some() {
                node.name = remote.node_name.clone();
            }
            if remote.node_type.is_some() {
                node.node_type = remote.node_type.clone();
            }
            if remote.status.rank() >= node.status.rank() {
                node.status = remote.status;
                node.started_at = remote.started_at.or(node.started_at);
                node.completed_at = remote.completed_at.or(node.completed_at);
                if remote.error.is_some() {
                    node.error = remote.error.clone();
                }
            }
        }
        for id in &next.execution_path {
            next.nodes
                .entry(id.clone())
                .or_insert_with(|| NodeState::new(id.clone()));
        }

        if next.status.is_terminal() {
            next.current_node_id = None;
            next.completed_at = next.completed_at.or(Some(snapshot.state_timestamp));
        } else {
            let current_still_running = next
                .current_node_id
                .as_ref()
                .and_then(|id| next.nodes.get(id))
                .is_some_and(|n| n.status == NodeStatus::Running);
            if !current_still_running {
                next.current_node_id = next
                    .execution_path
                    .iter()
                    .rev()
                    .find(|id| {
                        next.nodes
                            .get(*id)
                            .is_some_and(|n| n.status == NodeStatus::Running)
                    })
                    .cloned();
            }
        }

        next
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Starting | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    pub fn current_node(&self) -> Option<&NodeState> {
        self.current_node_id
            .as_deref()
            .and_then(|id| self.nodes.get(id))
    }

    /// Append to the execution path unless already present.
    pub(crate) fn push_path(&mut self, node_id: &str) {
        if !self.execution_path.iter().any(|id| id == node_id) {
            self.execution_path.push(node_id.to_string());
        }
    }

    pub(crate) fn node_entry(&mut self, node_id: &str) -> &mut NodeState {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeState::new(node_id))
    }
}

/// Point-in-time summary sent as the payload of an `init` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub node_progress: BTreeMap<String, SnapshotNode>,
    /// Low-water mark: events at or before this instant are already
    /// reflected in the snapshot.
    pub state_timestamp: i64,
}

impl Snapshot {
    /// Summarize a state for a joining reader.
    pub fn of(state: &RunState, run_id: impl Into<String>, state_timestamp: i64) -> Self {
        Self {
            run_id: run_id.into(),
            graph_id: state.graph_id.clone(),
            graph_name: state.graph_name.clone(),
            status: state.status,
            execution_path: state.execution_path.clone(),
            node_progress: state
                .nodes
                .iter()
                .map(|(id, node)| (id.clone(), SnapshotNode::from(node)))
                .collect(),
            state_timestamp,
        }
    }
}

/// Per-node entry of a snapshot.
///
/// Accepts either the full object form or a bare status string
/// (`{"n1": "completed"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SnapshotNodeRepr")]
pub struct SnapshotNode {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnapshotNode {
    pub fn with_status(status: NodeStatus) -> Self {
        Self {
            status,
            node_name: None,
            node_type: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

impl From<&NodeState> for SnapshotNode {
    fn from(node: &NodeState) -> Self {
        Self {
            status: node.status,
            node_name: node.name.clone(),
            node_type: node.node_type.clone(),
            started_at: node.started_at,
            completed_at: node.completed_at,
            error: node.error.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotNodeRepr {
    Status(NodeStatus),
    #[serde(rename_all = "camelCase")]
    Full {
        status: NodeStatus,
        #[serde(default)]
        node_name: Option<String>,
        #[serde(default)]
        node_type: Option<String>,
        #[serde(default)]
        started_at: Option<i64>,
        #[serde(default)]
        completed_at: Option<i64>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl From<SnapshotNodeRepr> for SnapshotNode {
    fn from(repr: SnapshotNodeRepr) -> Self {
        match repr {
            SnapshotNodeRepr::Status(status) => Self::with_status(status),
            SnapshotNodeRepr::Full {
                status,
                node_name,
                node_type,
                started_at,
                completed_at,
                error,
            } => Self {
                status,
                node_name,
                node_type,
                started_at,
                completed_at,
                error,
            },
        }
    }
}
