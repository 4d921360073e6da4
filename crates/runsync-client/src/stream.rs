use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::AbortHandle;
use futures::stream::{Abortable, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use tracing::debug;

use runsync_core::event::Event;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::sse::decode_event_stream;

/// Stops an [`EventStream`] from another task.
///
/// Cancelling is idempotent and harmless after the stream has ended.
#[derive(Debug, Clone)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_aborted()
    }
}

/// A decoded, cancellable run event stream.
///
/// Once cancelled, no further item is yielded even if the connection still
/// has unread data.
pub struct EventStream {
    inner: Abortable<BoxStream<'static, std::result::Result<Event, ClientError>>>,
    handle: CancelHandle,
}

impl EventStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Event, ClientError>> + Send + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            inner: Abortable::new(stream.boxed(), registration),
            handle: CancelHandle(handle),
        }
    }

    /// Decode a raw SSE byte stream.
    pub fn from_bytes<S, B, E>(byte_stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        Self::new(decode_event_stream(byte_stream))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl Stream for EventStream {
    type Item = std::result::Result<Event, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Opens run event streams over HTTP.
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl EventStreamClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = config.http_client()?;
        Ok(Self { http, config })
    }

    pub fn with_http(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    /// Subscribe to the stream of `run_id`.
    ///
    /// Returns once the response headers are in; the body is not read until
    /// the returned stream is polled, so nothing the server sends after this
    /// point is missed.
    pub async fn open(&self, run_id: &str) -> Result<EventStream> {
        let url = self.config.stream_url(run_id);
        debug!(run_id, url = %url, "opening event stream");
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "event stream for {run_id} returned {status}"
            )));
        }
        Ok(EventStream::from_bytes(response.bytes_stream()))
    }
}
