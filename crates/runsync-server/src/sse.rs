use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream};
use axum::response::Sse;
use futures::Stream;
use tracing::warn;

use runsync_core::event::Event;

/// Wrap a frame stream in an SSE response with a 5-second keep-alive so
/// idle runs survive proxy timeouts.
pub fn sse_response<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<SseEvent, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(5))
            .text("keepalive"),
    )
}

/// One run event as a JSON `data:` frame. An event that fails to encode is
/// replaced by a comment line so the stream carries on.
pub fn sse_run_event(event: &Event) -> Result<SseEvent, Infallible> {
    match event.to_json() {
        Ok(json) => Ok(SseEvent::default().data(json)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "could not encode event");
            Ok(SseEvent::default().comment("unencodable event"))
        }
    }
}

/// The end-of-stream sentinel.
pub fn sse_done() -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default().data("[DONE]"))
}
