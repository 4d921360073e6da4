use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::state::Snapshot;

/// One decoded frame of the run event stream.
///
/// Fields shared by every variant live here; the variant-specific payload
/// is flattened in from [`EventKind`], so the wire shape is a single flat
/// object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Producer clock, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_name: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    RunStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry_node_id: Option<String>,
    },
    NodeStart {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_type: Option<String>,
    },
    NodeProgress {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    NodeComplete {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<String>,
    },
    NodeError {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Chunk {
        chunk: String,
    },
    ThinkingChunk {
        chunk: String,
    },
    RunComplete,
    RunError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Init {
        state: Snapshot,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::NodeStart { .. } => "node_start",
            Self::NodeProgress { .. } => "node_progress",
            Self::NodeComplete { .. } => "node_complete",
            Self::NodeError { .. } => "node_error",
            Self::Chunk { .. } => "chunk",
            Self::ThinkingChunk { .. } => "thinking_chunk",
            Self::RunComplete => "run_complete",
            Self::RunError { .. } => "run_error",
            Self::Init { .. } => "init",
        }
    }
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: None,
            run_id: None,
            graph_id: None,
            graph_name: None,
            kind,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_graph(mut self, graph_id: impl Into<String>, graph_name: Option<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self.graph_name = graph_name;
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn run_start(entry_node_id: Option<&str>) -> Self {
        Self::new(EventKind::RunStart {
            entry_node_id: entry_node_id.map(String::from),
        })
    }

    pub fn node_start(node_id: impl Into<String>) -> Self {
        Self::new(EventKind::NodeStart {
            node_id: node_id.into(),
            node_name: None,
            node_type: None,
        })
    }

    pub fn node_progress(node_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(EventKind::NodeProgress {
            node_id: node_id.into(),
            label: Some(label.into()),
            current: None,
            total: None,
        })
    }

    pub fn node_complete(node_id: impl Into<String>, next_node_id: Option<&str>) -> Self {
        Self::new(EventKind::NodeComplete {
            node_id: node_id.into(),
            next_node_id: next_node_id.map(String::from),
        })
    }

    pub fn node_error(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(EventKind::NodeError {
            node_id: node_id.into(),
            error: Some(error.into()),
        })
    }

    pub fn chunk(chunk: impl Into<String>) -> Self {
        Self::new(EventKind::Chunk {
            chunk: chunk.into(),
        })
    }

    pub fn thinking_chunk(chunk: impl Into<String>) -> Self {
        Self::new(EventKind::ThinkingChunk {
            chunk: chunk.into(),
        })
    }

    pub fn run_complete() -> Self {
        Self::new(EventKind::RunComplete)
    }

    pub fn run_error(error: impl Into<String>) -> Self {
        Self::new(EventKind::RunError {
            error: Some(error.into()),
        })
    }

    pub fn init(snapshot: Snapshot) -> Self {
        let run_id = snapshot.run_id.clone();
        Self::new(EventKind::Init { state: snapshot }).with_run_id(run_id)
    }

    /// Decode the JSON payload of one `data:` frame.
    pub fn decode(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// `run_complete` or `run_error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::RunComplete | EventKind::RunError { .. })
    }

    /// Events that describe the shape of a run rather than streamed text.
    /// A structural event is enough to bootstrap a state without a snapshot.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self.kind,
            EventKind::Chunk { .. } | EventKind::ThinkingChunk { .. } | EventKind::Init { .. }
        )
    }

    pub fn node_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::NodeStart { node_id, .. }
            | EventKind::NodeProgress { node_id, .. }
            | EventKind::NodeComplete { node_id, .. }
            | EventKind::NodeError { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NodeStatus, RunStatus};

    #[test]
    fn decode_node_start() {
        let event = Event::decode(
            r#"{"type":"node_start","timestamp":1001,"runId":"r1","nodeId":"n1","nodeName":"Fetch","nodeType":"http"}"#,
        )
        .unwrap();
        assert_eq!(event.timestamp, Some(1001));
        assert_eq!(event.run_id.as_deref(), Some("r1"));
        match event.kind {
            EventKind::NodeStart {
                node_id,
                node_name,
                node_type,
            } => {
                assert_eq!(node_id, "n1");
                assert_eq!(node_name.as_deref(), Some("Fetch"));
                assert_eq!(node_type.as_deref(), Some("http"));
            }
            other => panic!("Expected NodeStart, got {other:?}"),
        }
    }

    #[test]
    fn decode_run_start_with_graph() {
        let event =
            Event::decode(r#"{"type":"run_start","graphId":"g1","graphName":"Demo","entryNodeId":"n1"}"#)
                .unwrap();
        assert_eq!(event.graph_id.as_deref(), Some("g1"));
        assert_eq!(event.graph_name.as_deref(), Some("Demo"));
        assert_eq!(
            event.kind,
            EventKind::RunStart {
                entry_node_id: Some("n1".into())
            }
        );
    }

    #[test]
    fn decode_unit_variant_ignores_extra_fields() {
        let event = Event::decode(r#"{"type":"run_complete","timestamp":5,"nodeId":null}"#).unwrap();
        assert_eq!(event.kind, EventKind::RunComplete);
        assert!(event.is_terminal());
    }

    #[test]
    fn decode_init_with_snapshot() {
        let event = Event::decode(
            r#"{"type":"init","state":{"runId":"r1","graphId":"g1","status":"running","executionPath":["n1"],"nodeProgress":{"n1":"running"},"stateTimestamp":1000}}"#,
        )
        .unwrap();
        match event.kind {
            EventKind::Init { state } => {
                assert_eq!(state.status, RunStatus::Running);
                assert_eq!(state.state_timestamp, 1000);
                assert_eq!(state.node_progress["n1"].status, NodeStatus::Running);
            }
            other => panic!("Expected Init, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(matches!(
            Event::decode(r#"{"type":"mystery"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_missing_node_id() {
        assert!(Event::decode(r#"{"type":"node_start"}"#).is_err());
    }

    #[test]
    fn decode_rejects_empty() {
        assert!(matches!(Event::decode("  "), Err(ProtocolError::Empty)));
    }

    #[test]
    fn encode_uses_wire_names() {
        let json = Event::node_complete("n1", Some("n2"))
            .with_run_id("r1")
            .at(42)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "node_complete");
        assert_eq!(value["nodeId"], "n1");
        assert_eq!(value["nextNodeId"], "n2");
        assert_eq!(value["runId"], "r1");
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn encoded_event_decodes_back() {
        let original = Event::node_progress("n1", "step 2").with_run_id("r1").at(7);
        let decoded = Event::decode(&original.to_json().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn classification() {
        assert!(Event::node_start("n1").is_structural());
        assert!(Event::run_complete().is_structural());
        assert!(!Event::chunk("x").is_structural());
        assert!(!Event::thinking_chunk("x").is_structural());
        assert_eq!(Event::node_error("n9", "boom").node_id(), Some("n9"));
        assert_eq!(Event::chunk("x").node_id(), None);
        assert_eq!(Event::thinking_chunk("x").name(), "thinking_chunk");
    }
}
