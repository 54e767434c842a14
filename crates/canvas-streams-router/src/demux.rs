//! Demultiplexing for sessions sharing one physical transport.
//!
//! One committee request streams N opinions, a review per opinion, and one
//! synthesis, all interleaved over a single connection. Each frame payload
//! carries the index of the logical session it belongs to; routing is a
//! pure function of that embedded tag, never of timing.

use std::sync::Arc;

use canvas_streams_core::{
    ContentSink, DecodeError, Frame, Producer, ProducerError, decode_frames,
};
use canvas_streams_session::{
    RegisterOptions, SessionId, SessionRegistry, TransportGroup,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

/// What a routed frame means for its target session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedKind {
    /// The logical session begins; register it.
    Start,
    /// Content delta to append.
    Chunk(String),
    /// The logical session finished. Carries the producer's authoritative
    /// full content when the payload includes one.
    Done(Option<String>),
    /// The logical session failed; siblings are unaffected.
    Error(String),
}

/// A frame resolved to its owning logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFrame {
    /// Target session id.
    pub id: SessionId,
    /// Meaning of the frame for that session.
    pub kind: RoutedKind,
}

/// Pure frame-to-session routing.
///
/// `None` means the frame addresses no logical session (overall progress,
/// keepalives, unknown events) and is passed through as a group-level
/// event.
pub trait FrameRouter: Send + Sync {
    /// Resolve a frame to its target session.
    fn route(&self, frame: &Frame) -> Option<RoutedFrame>;
}

/// Payload shape shared by the committee event family.
#[derive(Debug, Deserialize)]
struct CommitteePayload {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    reviewer_index: Option<u32>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    full_content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Router for the committee event vocabulary:
/// `opinion_start/chunk/done/error` keyed by `index`,
/// `review_start/chunk/done/error` keyed by `reviewer_index`, and the
/// `synthesis_*` family addressing the single synthesis session.
///
/// Malformed payloads are logged and skipped, never raised.
#[derive(Debug, Clone, Default)]
pub struct CommitteeRouter;

impl CommitteeRouter {
    /// Session id for an opinion stream.
    #[must_use]
    pub fn opinion_id(index: u32) -> SessionId {
        format!("opinion-{index}")
    }

    /// Session id for a review stream.
    #[must_use]
    pub fn review_id(reviewer_index: u32) -> SessionId {
        format!("review-{reviewer_index}")
    }

    /// Session id for the synthesis stream.
    #[must_use]
    pub fn synthesis_id() -> SessionId {
        "synthesis".to_string()
    }
}

impl FrameRouter for CommitteeRouter {
    fn route(&self, frame: &Frame) -> Option<RoutedFrame> {
        let (family, stage) = frame.event.split_once('_')?;

        let id = match family {
            "opinion" => Self::opinion_id(frame.json::<CommitteePayload>()?.index?),
            "review" => Self::review_id(frame.json::<CommitteePayload>()?.reviewer_index?),
            "synthesis" => Self::synthesis_id(),
            _ => return None,
        };

        // Parsed again per stage so chunk content survives the id lookup;
        // payloads are small and this keeps routing a pure function.
        let payload = || frame.json::<CommitteePayload>();
        let kind = match stage {
            "start" => RoutedKind::Start,
            "chunk" => RoutedKind::Chunk(payload()?.content.unwrap_or_default()),
            "done" => RoutedKind::Done(payload().and_then(|p| p.full_content)),
            "error" => RoutedKind::Error(
                payload()
                    .and_then(|p| p.error)
                    .unwrap_or_else(|| "generation failed".to_string()),
            ),
            _ => return None,
        };

        Some(RoutedFrame { id, kind })
    }
}

/// Routes frames from one shared transport to many logical sessions.
///
/// Members carry no cancellation handle of their own; the transport's
/// single token stays on the [`TransportGroup`]. Stopping a member is a
/// soft pause (content keeps accumulating, delivery is suppressed);
/// [`Self::abort_all`] is the only operation that cancels the transport,
/// and it takes every member with it.
pub struct Demultiplexer {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn ContentSink>,
    router: Arc<dyn FrameRouter>,
    transport: TransportGroup,
    tag: String,
}

impl Demultiplexer {
    /// Create a demultiplexer for one shared connection.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn ContentSink>,
        router: Arc<dyn FrameRouter>,
        group: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sink,
            router,
            transport: TransportGroup::new(group),
            tag: tag.into(),
        }
    }

    /// The shared-transport handle.
    #[must_use]
    pub const fn transport(&self) -> &TransportGroup {
        &self.transport
    }

    /// Suppress delivery for one member without touching the transport.
    pub fn pause_member(&self, id: &str) -> bool {
        self.registry.pause(id)
    }

    /// Resume delivery for one member. The sink immediately receives the
    /// full un-delivered backlog as the accumulated content; no per-chunk
    /// replay happens because the accumulator is the backlog.
    pub fn resume_member(&self, id: &str) -> bool {
        match self.registry.resume(id) {
            Some(backlog) => {
                self.sink.on_content(id, "", &backlog);
                true
            }
            None => false,
        }
    }

    /// Cancel the shared transport and unregister every member as aborted.
    pub fn abort_all(&self) -> usize {
        self.transport.abort_all(&self.registry)
    }

    /// Consume the shared transport until it closes, routing every frame
    /// to its logical session.
    ///
    /// # Errors
    /// Returns [`ProducerError`] when the handshake fails; no sessions are
    /// registered in that case.
    pub async fn run(&self, producer: &dyn Producer) -> Result<(), ProducerError> {
        let stream = producer.open().await?;
        let frames = decode_frames(stream);
        tokio::pin!(frames);

        let cancel = self.transport.token();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // abort_all already settled and removed the members.
                    debug!(group = %self.transport.id(), "shared transport aborted");
                    return Ok(());
                }
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(DecodeError::Transport(e))) => {
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                        self.fail_survivors(&e.message);
                        return Ok(());
                    }
                    None => {
                        self.finish_survivors();
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Register an id the first time any frame addresses it.
    ///
    /// Routing is by embedded tag alone: a chunk, done, or error frame may
    /// be the first one seen for its session (a start frame is optional,
    /// and a malformed start payload only forfeits that frame, not the
    /// whole session). Already-registered sessions keep their accumulator.
    fn ensure_member(&self, id: &str) {
        if !self.registry.contains(id) {
            self.registry.register(
                id.to_string(),
                RegisterOptions::tagged(&self.tag).with_group(self.transport.id()),
            );
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let Some(routed) = self.router.route(frame) else {
            // Group-level event (overall status, log, done marker, ...).
            self.sink.on_event(self.transport.id(), frame);
            return;
        };

        match routed.kind {
            RoutedKind::Start => {
                self.ensure_member(&routed.id);
                self.sink.on_event(&routed.id, frame);
            }
            RoutedKind::Chunk(delta) => {
                self.ensure_member(&routed.id);
                if let Some(appended) = self.registry.append_content(&routed.id, &delta) {
                    if appended.deliver {
                        self.sink.on_content(&routed.id, &delta, &appended.accumulated);
                    }
                } else {
                    warn!(id = %routed.id, "chunk for terminated session dropped");
                }
            }
            RoutedKind::Done(full_content) => {
                // Done supersedes pause state; the payload's full content,
                // when present, is authoritative over the accumulator.
                self.ensure_member(&routed.id);
                if let Some(accumulated) = self.registry.finish(&routed.id) {
                    let content = full_content.unwrap_or(accumulated);
                    self.sink.on_done(&routed.id, &content);
                    self.registry.unregister(&routed.id);
                }
            }
            RoutedKind::Error(message) => {
                // Isolated per member; siblings keep streaming.
                self.ensure_member(&routed.id);
                if self.registry.fail(&routed.id).is_some() {
                    self.sink.on_error(&routed.id, &message);
                    self.registry.unregister(&routed.id);
                }
            }
        }
    }

    /// Transport failed mid-flight: every still-live member fails with it.
    fn fail_survivors(&self, message: &str) {
        for id in self.registry.group_members(self.transport.id()) {
            if self.registry.fail(&id).is_some() {
                self.sink.on_error(&id, message);
            }
            self.registry.unregister(&id);
        }
    }

    /// Transport closed cleanly: finalize stragglers from their accumulators.
    fn finish_survivors(&self) {
        for id in self.registry.group_members(self.transport.id()) {
            if let Some(content) = self.registry.finish(&id) {
                self.sink.on_done(&id, &content);
            }
            self.registry.unregister(&id);
        }
    }
}
