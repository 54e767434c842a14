//! Incremental SSE frame decoder.
//!
//! Turns a raw chunked byte stream into an ordered sequence of [`Frame`]s.
//! Chunks may arrive in arbitrary sizes and may split a logical frame (or a
//! single line) across two deliveries; a trailing partial line is buffered
//! until the next chunk. The decoder handles:
//! - `event:` / `data:` field extraction (multiple `data:` lines join with `\n`)
//! - blank-line frame dispatch, with `message` as the default event type
//! - `:` comment lines and unknown fields (`id:`, `retry:`, ...) skipped
//! - flush of a fully-formed trailing frame at end-of-stream

use bytes::BytesMut;
use futures::Stream;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::frame::{DEFAULT_EVENT, Frame};
use crate::producer::{ByteStream, TransportError};

/// Decoder error.
///
/// Only transport-level failures surface here; malformed payloads are a
/// consumer concern and are never fatal to the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The underlying stream read failed mid-flight. Emitted at most once;
    /// the frame sequence ends immediately after.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Partially-assembled frame carried across lines and chunk boundaries.
#[derive(Default)]
struct PendingFrame {
    event: Option<String>,
    data: Option<String>,
}

impl PendingFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none()
    }

    fn field(&mut self, name: &str, value: &str) {
        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            // id, retry, and anything else: ignored for forward compatibility
            _ => {}
        }
    }

    fn take(&mut self) -> Option<Frame> {
        if self.is_empty() {
            return None;
        }
        let event = self.event.take().unwrap_or_else(|| DEFAULT_EVENT.to_string());
        let data = self.data.take().unwrap_or_default();
        Some(Frame { event, data })
    }
}

struct DecoderState {
    stream: ByteStream,
    buffer: BytesMut,
    pending: PendingFrame,
    finished: bool,
}

/// Decode an incrementally-delivered byte stream into ordered frames.
///
/// The returned stream is lazy and finite: it ends when the transport
/// closes (after flushing any fully-formed trailing frame), or immediately
/// after yielding a single `Err` when the transport fails mid-flight.
pub fn decode_frames(byte_stream: ByteStream) -> impl Stream<Item = Result<Frame, DecodeError>> + Send {
    let state = DecoderState {
        stream: byte_stream,
        buffer: BytesMut::with_capacity(8192),
        pending: PendingFrame::default(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            // Drain complete lines already buffered.
            while let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }

                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    warn!("skipping non-UTF-8 line in event stream");
                    continue;
                };

                if let Some(frame) = feed_line(&mut state.pending, line) {
                    return Some((Ok(frame), state));
                }
            }

            // Need more input.
            match state.stream.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    // Surface the failure once, then terminate the sequence.
                    state.finished = true;
                    return Some((Err(DecodeError::Transport(e)), state));
                }
                None => {
                    state.finished = true;
                    // A trailing line without its newline still counts.
                    if !state.buffer.is_empty() {
                        let trailing = state.buffer.split();
                        match std::str::from_utf8(&trailing) {
                            Ok(line) => {
                                let line = line.trim_end_matches('\r');
                                if let Some(frame) = feed_line(&mut state.pending, line) {
                                    return Some((Ok(frame), state));
                                }
                            }
                            Err(_) => warn!("skipping non-UTF-8 line in event stream"),
                        }
                    }
                    return state.pending.take().map(|frame| (Ok(frame), state));
                }
            }
        }
    })
}

/// Feed one logical line into the pending frame.
///
/// Returns a completed frame when the line is a blank dispatch separator.
fn feed_line(pending: &mut PendingFrame, line: &str) -> Option<Frame> {
    if line.is_empty() {
        return pending.take();
    }
    if line.starts_with(':') {
        return None;
    }

    match line.split_once(':') {
        Some((name, value)) => {
            // Per the SSE grammar, a single leading space in the value is
            // part of the separator, not the payload.
            let value = value.strip_prefix(' ').unwrap_or(value);
            pending.field(name, value);
        }
        // A field name with no colon is a field with an empty value.
        None => pending.field(line, ""),
    }
    None
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::StreamExt;

    use super::*;
    use crate::producer::TransportError;

    fn byte_stream(chunks: Vec<Result<Bytes, TransportError>>) -> ByteStream {
        futures::stream::iter(chunks).boxed()
    }

    fn ok(chunk: &str) -> Result<Bytes, TransportError> {
        Ok(Bytes::copy_from_slice(chunk.as_bytes()))
    }

    async fn collect(chunks: Vec<Result<Bytes, TransportError>>) -> Vec<Result<Frame, DecodeError>> {
        decode_frames(byte_stream(chunks)).collect().await
    }

    #[tokio::test]
    async fn decodes_single_frame() {
        let frames = collect(vec![ok("event: status\ndata: thinking\n\n")]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Frame::new("status", "thinking")
        );
    }

    #[tokio::test]
    async fn defaults_to_message_event() {
        let frames = collect(vec![ok("data: hello\n\n")]).await;
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::message("hello"));
    }

    #[tokio::test]
    async fn joins_multiple_data_lines() {
        let frames = collect(vec![ok("data: line one\ndata: line two\n\n")]).await;
        assert_eq!(
            frames[0].as_ref().unwrap().data,
            "line one\nline two"
        );
    }

    #[tokio::test]
    async fn frame_split_across_chunks() {
        let frames = collect(vec![
            ok("event: opinion_ch"),
            ok("unk\ndata: {\"index\""),
            ok(":0}\n\n"),
        ])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Frame::new("opinion_chunk", "{\"index\":0}")
        );
    }

    #[tokio::test]
    async fn multiple_frames_in_one_chunk() {
        let frames = collect(vec![ok(
            "event: message\ndata: a\n\nevent: done\ndata: \n\n",
        )])
        .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::new("message", "a"));
        assert_eq!(frames[1].as_ref().unwrap(), &Frame::new("done", ""));
    }

    #[tokio::test]
    async fn handles_crlf_line_endings() {
        let frames = collect(vec![ok("event: message\r\ndata: hi\r\n\r\n")]).await;
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::new("message", "hi"));
    }

    #[tokio::test]
    async fn skips_comments_and_unknown_fields() {
        let frames = collect(vec![ok(
            ": keepalive\nid: 42\nretry: 1000\ndata: real\n\n",
        )])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().data, "real");
    }

    #[tokio::test]
    async fn flushes_trailing_frame_at_eof() {
        // Transport closed before the final blank line was delivered.
        let frames = collect(vec![ok("event: done\ndata: final")]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::new("done", "final"));
    }

    #[tokio::test]
    async fn skips_non_utf8_trailing_bytes_at_eof() {
        // Garbage after the last complete frame must not mask pending data.
        let frames = collect(vec![
            ok("event: done\ndata: final\n"),
            Ok(Bytes::from_static(&[0xff, 0xfe, 0xfd])),
        ])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::new("done", "final"));
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let frames = collect(vec![]).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn transport_error_surfaces_once_then_ends() {
        let frames = collect(vec![
            ok("data: before\n\n"),
            Err(TransportError::new("connection reset")),
            ok("data: after\n\n"),
        ])
        .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(DecodeError::Transport(_))));
    }

    #[tokio::test]
    async fn preserves_arrival_order() {
        let frames = collect(vec![ok(
            "data: 1\n\ndata: 2\n\ndata: 3\n\n",
        )])
        .await;
        let payloads: Vec<String> = frames
            .into_iter()
            .map(|f| f.unwrap().data)
            .collect();
        assert_eq!(payloads, vec!["1", "2", "3"]);
    }
}
