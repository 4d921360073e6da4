//! End-to-end reconciliation scenarios over decoded wire frames.

use runsync_core::prelude::*;

fn decode_all(frames: &[&str]) -> Vec<Event> {
    frames
        .iter()
        .map(|frame| Event::decode(frame).unwrap())
        .collect()
}

#[test]
fn fresh_run_from_run_start_to_completion() {
    let events = decode_all(&[
        r#"{"type":"run_start","runId":"r1","graphId":"g1","entryNodeId":"n1","timestamp":1}"#,
        r#"{"type":"node_start","runId":"r1","nodeId":"n1","timestamp":2}"#,
        r#"{"type":"chunk","runId":"r1","chunk":"Hi","timestamp":3}"#,
        r#"{"type":"node_complete","runId":"r1","nodeId":"n1","nextNodeId":null,"timestamp":4}"#,
        r#"{"type":"run_complete","runId":"r1","timestamp":5}"#,
    ]);

    let mut reconciler = EventReconciler::new();
    let generation = reconciler.generation();
    for event in events {
        reconciler.ingest(generation, event);
    }

    let state = reconciler.state();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.graph_id.as_deref(), Some("g1"));
    assert_eq!(state.execution_path, vec!["n1"]);
    assert_eq!(state.node("n1").unwrap().status, NodeStatus::Completed);
    assert_eq!(state.content, "Hi");
    assert!(state.current_node_id.is_none());
}

#[test]
fn fresh_run_declared_by_caller() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.start_run("r1", Some("g1".into()), Some("Demo".into()));
    for event in decode_all(&[
        r#"{"type":"run_start","runId":"r1","entryNodeId":"n1"}"#,
        r#"{"type":"node_start","runId":"r1","nodeId":"n1"}"#,
        r#"{"type":"chunk","runId":"r1","chunk":"Hi"}"#,
        r#"{"type":"node_complete","runId":"r1","nodeId":"n1"}"#,
        r#"{"type":"run_complete","runId":"r1"}"#,
    ]) {
        reconciler.ingest(generation, event);
    }
    let state = reconciler.state();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.graph_name.as_deref(), Some("Demo"));
    assert_eq!(state.content, "Hi");
}

#[test]
fn late_join_applies_snapshot_then_newer_events() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.generation();
    for event in decode_all(&[
        r#"{"type":"init","runId":"r1","state":{"runId":"r1","graphId":"g1","graphName":"Demo","status":"running","executionPath":["n1","n2"],"nodeProgress":{"n1":"completed","n2":"running"},"stateTimestamp":1000}}"#,
    ]) {
        reconciler.ingest(generation, event);
    }
    assert_eq!(reconciler.state().node("n2").unwrap().status, NodeStatus::Running);
    assert_eq!(reconciler.state().current_node_id.as_deref(), Some("n2"));

    for event in decode_all(&[
        r#"{"type":"node_complete","runId":"r1","nodeId":"n2","timestamp":1050}"#,
    ]) {
        reconciler.ingest(generation, event);
    }
    let state = reconciler.state();
    assert_eq!(state.node("n2").unwrap().status, NodeStatus::Completed);
    assert_eq!(state.node("n2").unwrap().completed_at, Some(1050));
    assert_eq!(state.execution_path, vec!["n1", "n2"]);
}

#[test]
fn reconnect_replays_buffer_after_low_water_mark() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.resume("r1");
    for ts in [995, 998, 1001, 1007] {
        let outcome = reconciler.ingest(
            generation,
            Event::chunk(format!("[{ts}]")).with_run_id("r1").at(ts),
        );
        assert_eq!(outcome, Outcome::Buffered);
    }
    let snapshot = Snapshot {
        run_id: "r1".into(),
        graph_id: None,
        graph_name: None,
        status: RunStatus::Running,
        execution_path: vec![],
        node_progress: Default::default(),
        state_timestamp: 1000,
    };
    assert_eq!(reconciler.ingest(generation, Event::init(snapshot)), Outcome::Applied);
    assert_eq!(reconciler.state().content, "[1001][1007]");
}

#[test]
fn stale_run_is_filtered() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.start_run("r1", None, None);
    reconciler.ingest(generation, Event::node_start("n1").with_run_id("r1"));
    let before = reconciler.state().clone();

    for event in decode_all(&[
        r#"{"type":"node_start","runId":"r0","nodeId":"zz"}"#,
        r#"{"type":"chunk","runId":"r0","chunk":"stale"}"#,
        r#"{"type":"run_error","runId":"r0","error":"old failure"}"#,
    ]) {
        assert_eq!(
            reconciler.ingest(generation, event),
            Outcome::Dropped(DropReason::ForeignRun)
        );
    }
    assert_eq!(reconciler.state(), &before);
}

#[test]
fn redelivered_terminal_event_is_noop() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.start_run("r1", None, None);
    reconciler.ingest(generation, Event::run_error("boom").with_run_id("r1"));
    let settled = reconciler.state().clone();
    reconciler.ingest(generation, Event::run_error("boom").with_run_id("r1"));
    reconciler.ingest(generation, Event::run_complete().with_run_id("r1"));
    assert_eq!(reconciler.state(), &settled);
    assert_eq!(settled.status, RunStatus::Error);
}

#[test]
fn reconnect_ending_without_snapshot_keeps_progress() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.start_run("r1", Some("g1".into()), None);
    for event in decode_all(&[
        r#"{"type":"run_start","runId":"r1","entryNodeId":"n1","timestamp":1}"#,
        r#"{"type":"node_start","runId":"r1","nodeId":"n1","timestamp":2}"#,
        r#"{"type":"chunk","runId":"r1","chunk":"hello","timestamp":3}"#,
        r#"{"type":"node_complete","runId":"r1","nodeId":"n1","nextNodeId":"n2","timestamp":4}"#,
    ]) {
        reconciler.ingest(generation, event);
    }

    // The new connection delivers one node and closes before any `init`.
    let generation = reconciler.resume("r1");
    for event in decode_all(&[r#"{"type":"node_start","runId":"r1","nodeId":"n2","timestamp":5}"#]) {
        assert_eq!(reconciler.ingest(generation, event), Outcome::Buffered);
    }
    reconciler.bootstrap_from_buffer();

    let state = reconciler.state();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.execution_path, vec!["n1", "n2"]);
    assert_eq!(state.node("n1").unwrap().status, NodeStatus::Completed);
    assert_eq!(state.content, "hello");
    assert_eq!(state.graph_id.as_deref(), Some("g1"));
}

#[test]
fn reconnect_to_finished_run_without_snapshot_stays_finished() {
    let mut reconciler = EventReconciler::new();
    let generation = reconciler.start_run("r1", None, None);
    for event in decode_all(&[
        r#"{"type":"node_start","runId":"r1","nodeId":"n1","timestamp":1}"#,
        r#"{"type":"run_complete","runId":"r1","timestamp":2}"#,
    ]) {
        reconciler.ingest(generation, event);
    }

    let generation = reconciler.resume("r1");
    for event in decode_all(&[r#"{"type":"node_start","runId":"r1","nodeId":"n9","timestamp":3}"#]) {
        reconciler.ingest(generation, event);
    }
    reconciler.bootstrap_from_buffer();

    let state = reconciler.state();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.execution_path, vec!["n1"]);
}
