use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event as SseEvent, KeepAliveStream};
use axum::{Json, Router, routing::{get, post}};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use runsync_core::event::Event;
use runsync_core::state::RunState;

use crate::error::AppError;
use crate::hub::Join;
use crate::runtime::JobRequest;
use crate::sse::{sse_done, sse_response, sse_run_event};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(trigger_run))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/stream", get(stream_run))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    run_id: String,
    graph_id: String,
    #[serde(default)]
    graph_name: Option<String>,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerAccepted {
    run_id: String,
}

/// Register the run and hand it to the runtime. Progress arrives on the
/// stream endpoint, which callers should open first.
async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerAccepted>), AppError> {
    if req.run_id.trim().is_empty() {
        return Err(AppError::BadRequest("runId is required".into()));
    }
    if req.graph_id.trim().is_empty() {
        return Err(AppError::BadRequest("graphId is required".into()));
    }

    state
        .hub
        .register(&req.run_id, &req.graph_id, req.graph_name.clone())
        .await?;
    info!(run_id = %req.run_id, graph_id = %req.graph_id, "run triggered");

    let run_id = req.run_id.clone();
    let job = JobRequest {
        run_id: req.run_id,
        graph_id: req.graph_id,
        graph_name: req.graph_name,
        input: req.input,
    };
    if let Err(e) = state.runtime.submit(job, state.hub.emitter(&run_id)).await {
        warn!(run_id = %run_id, error = %e, "runtime rejected job");
        let rejection = Event::run_error(e.to_string());
        if let Err(publish_err) = state.hub.publish(&run_id, rejection).await {
            warn!(run_id = %run_id, error = %publish_err, "could not record rejection");
        }
        return Err(e.into());
    }

    Ok((StatusCode::ACCEPTED, Json(TriggerAccepted { run_id })))
}

/// Live event stream for one run.
///
/// A reader joining a registered run first receives an `init` snapshot.
/// The stream ends with `[DONE]` after a terminal event, or right after the
/// snapshot when the run has already finished.
async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Sse<KeepAliveStream<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let Join {
        snapshot,
        mut receiver,
    } = state.hub.join(&run_id).await;

    let stream = async_stream::stream! {
        let mut finished = false;
        if let Some(snapshot) = snapshot {
            finished = snapshot.status.is_terminal();
            yield sse_run_event(&Event::init(snapshot));
        }

        let mut lagged = false;
        while !finished {
            match receiver.recv().await {
                Ok(event) => {
                    finished = event.is_terminal();
                    yield sse_run_event(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %run_id, skipped, "reader fell behind, closing stream");
                    lagged = true;
                    break;
                }
                Err(RecvError::Closed) => break,
            }
        }

        if !lagged {
            yield sse_done();
        }
    };

    sse_response(stream)
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunState>, AppError> {
    state
        .hub
        .state(&run_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Run not found: {run_id}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use runsync_core::event::EventKind;
    use runsync_core::state::RunStatus;
    use tower::ServiceExt;

    use crate::hub::RunEmitter;
    use crate::runtime::{JobRuntime, LinearRuntime, RuntimeError};

    struct DownRuntime;

    #[async_trait]
    impl JobRuntime for DownRuntime {
        async fn submit(&self, _job: JobRequest, _emitter: RunEmitter) -> Result<(), RuntimeError> {
            Err(RuntimeError::Unavailable("no workers".into()))
        }
    }

    fn test_state() -> AppState {
        AppState::with_runtime(Arc::new(LinearRuntime::new().with_step_delay(Duration::ZERO)))
    }

    fn app(state: AppState) -> Router {
        Router::new().nest("/api", routes()).with_state(state)
    }

    fn parse_sse_events(body: &[u8]) -> (Vec<Event>, bool) {
        let text = String::from_utf8_lossy(body);
        let payloads: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .collect();
        let done = payloads.last() == Some(&"[DONE]");
        let events = payloads
            .into_iter()
            .filter(|data| *data != "[DONE]")
            .filter_map(|data| Event::decode(data).ok())
            .collect();
        (events, done)
    }

    fn post_run(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/runs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_terminal(state: &AppState, run_id: &str) -> RunState {
        for _ in 0..200 {
            if let Some(run) = state.hub.state(run_id).await {
                if run.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never finished");
    }

    #[tokio::test]
    async fn trigger_accepts_and_runs() {
        let state = test_state();
        let resp = app(state.clone())
            .oneshot(post_run(serde_json::json!({
                "runId": "r1",
                "graphId": "g1",
                "input": {"nodes": ["a", "b"], "prompt": "hi"}
            })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["runId"], "r1");

        let run = wait_terminal(&state, "r1").await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.execution_path, vec!["a", "b"]);
        assert_eq!(run.content, "hi");
    }

    #[tokio::test]
    async fn trigger_rejects_missing_graph() {
        let resp = app(test_state())
            .oneshot(post_run(serde_json::json!({"runId": "r1", "graphId": " "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_trigger_conflicts() {
        let state = test_state();
        let body = serde_json::json!({"runId": "r1", "graphId": "g1"});
        let first = app(state.clone()).oneshot(post_run(body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = app(state).oneshot(post_run(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejected_job_records_run_error() {
        let state = AppState::with_runtime(Arc::new(DownRuntime));
        let resp = app(state.clone())
            .oneshot(post_run(serde_json::json!({"runId": "r1", "graphId": "g1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Runtime unavailable: no workers");

        let run = state.hub.state("r1").await.unwrap();
        assert_eq!(run.status, RunStatus::Error);
    }

    #[tokio::test]
    async fn stream_opened_before_trigger_sees_every_event() {
        let state = test_state();
        let stream = app(state.clone())
            .oneshot(get("/api/runs/r1/stream"))
            .await
            .unwrap();
        assert_eq!(stream.status(), StatusCode::OK);

        let resp = app(state)
            .oneshot(post_run(serde_json::json!({
                "runId": "r1",
                "graphId": "g1",
                "input": {"nodes": ["a"]}
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let bytes = stream.into_body().collect().await.unwrap().to_bytes();
        let (events, done) = parse_sse_events(&bytes);
        assert!(done);
        assert!(!events.iter().any(|e| matches!(e.kind, EventKind::Init { .. })));
        assert_eq!(events.first().unwrap().name(), "run_start");
        assert_eq!(events.last().unwrap().name(), "run_complete");
        assert!(events.iter().all(|e| e.run_id.as_deref() == Some("r1")));
        let stamps: Vec<i64> = events.iter().filter_map(|e| e.timestamp).collect();
        assert_eq!(stamps.len(), events.len());
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn stream_of_finished_run_is_snapshot_then_done() {
        let state = test_state();
        app(state.clone())
            .oneshot(post_run(serde_json::json!({"runId": "r1", "graphId": "g1"})))
            .await
            .unwrap();
        wait_terminal(&state, "r1").await;

        let resp = app(state).oneshot(get("/api/runs/r1/stream")).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let (events, done) = parse_sse_events(&bytes);
        assert!(done);
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Init { state } => {
                assert_eq!(state.status, RunStatus::Completed);
                assert_eq!(state.execution_path, vec!["start", "respond"]);
            }
            other => panic!("expected init, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn get_run_returns_state_or_404() {
        let state = test_state();
        let missing = app(state.clone()).oneshot(get("/api/runs/r1")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        app(state.clone())
            .oneshot(post_run(serde_json::json!({"runId": "r1", "graphId": "g1"})))
            .await
            .unwrap();
        wait_terminal(&state, "r1").await;

        let resp = app(state).oneshot(get("/api/runs/r1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let run: RunState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(run.run_id.as_deref(), Some("r1"));
        assert_eq!(run.status, RunStatus::Completed);
    }
}
