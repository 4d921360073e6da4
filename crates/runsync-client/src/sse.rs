//! SSE (Server-Sent Events) frame decoding for the run event stream.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use runsync_core::event::Event;

use crate::error::ClientError;

/// Payload of the frame that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_MARKER: &str = "data:";

/// One recognized line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Reassembles newline-delimited frames from arbitrarily split reads.
///
/// The carry-over buffer holds raw bytes, so a multi-byte UTF-8 sequence
/// split across two reads is decoded intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read and return every complete frame it finished.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.carry.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(frame) = parse_line(&self.carry[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.carry.drain(..start);
        frames
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.carry);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix(DATA_MARKER)?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == DONE_SENTINEL {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(data.to_string()))
    }
}

fn decode_frame(payload: &str) -> Option<Event> {
    match Event::decode(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, payload, "skipping malformed event frame");
            None
        }
    }
}

/// Decode a byte stream into events in arrival order.
///
/// Malformed frames are logged and skipped. The stream ends at the `[DONE]`
/// sentinel or when the byte stream ends; a read error is yielded once as
/// [`ClientError::Transport`] and also ends it.
pub fn decode_event_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<Event, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        let mut byte_stream = Box::pin(byte_stream);

        while let Some(result) = byte_stream.next().await {
            let chunk = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(ClientError::Transport(e.to_string()));
                    return;
                }
            };
            for frame in decoder.push(chunk.as_ref()) {
                match frame {
                    Frame::Done => {
                        debug!("event stream reached sentinel");
                        return;
                    }
                    Frame::Data(payload) => {
                        if let Some(event) = decode_frame(&payload) {
                            yield Ok(event);
                        }
                    }
                }
            }
        }

        if let Some(Frame::Data(payload)) = decoder.finish() {
            if let Some(event) = decode_frame(&payload) {
                yield Ok(event);
            }
        }
    }
}
