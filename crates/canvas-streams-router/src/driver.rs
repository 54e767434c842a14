//! Drives one session that owns its transport end to end.

use std::{sync::Arc, time::Duration};

use canvas_streams_core::{ContentSink, DecodeError, Frame, Producer, decode_frames};
use canvas_streams_session::{RegisterOptions, SessionId, SessionRegistry};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Terminal outcome classification for one driven session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Stream finished; content is authoritative.
    Done,
    /// Handshake or transport failure.
    Failed,
    /// The session's own cancellation was invoked (or it timed out).
    Aborted,
}

/// Per-session result reported by the driver and the fan-out join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session identifier.
    pub id: SessionId,
    /// How the session terminated.
    pub status: SessionStatus,
    /// Accumulated content at termination.
    pub content: String,
    /// Failure description, present only for `Failed`.
    pub error: Option<String>,
}

/// Event-name dispatch table plus transport policy for a driver.
///
/// Event names are opaque strings owned by the consumer; anything not
/// listed here is forwarded through `on_event` as a no-op-safe pass-through.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Events whose payload is appended to the accumulator.
    pub content_events: Vec<String>,
    /// Events that finish the session cleanly.
    pub done_events: Vec<String>,
    /// Events that fail the session with a user-visible error.
    pub error_events: Vec<String>,
    /// Overall transport timeout; elapsing triggers the same path as an
    /// explicit stop. `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        use canvas_streams_core::frame::{DEFAULT_EVENT, DONE_EVENT, ERROR_EVENT};
        Self {
            content_events: vec![DEFAULT_EVENT.into(), "content".into()],
            done_events: vec![DONE_EVENT.into(), "complete".into()],
            error_events: vec![ERROR_EVENT.into()],
            timeout: None,
        }
    }
}

impl DriverConfig {
    /// Set the transport timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs one session over its own transport: opens the producer, decodes
/// frames, feeds the accumulator, and settles the session's terminal state
/// in the registry.
#[derive(Clone)]
pub struct SessionDriver {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn ContentSink>,
    config: DriverConfig,
}

impl SessionDriver {
    /// Create a driver with the default event dispatch table.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, sink: Arc<dyn ContentSink>) -> Self {
        Self {
            registry,
            sink,
            config: DriverConfig::default(),
        }
    }

    /// Create a driver with an explicit dispatch table.
    #[must_use]
    pub fn with_config(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn ContentSink>,
        config: DriverConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    /// Drive `id` to a terminal state.
    ///
    /// The session should already be registered (with its cancellation
    /// token, group, and handlers); an unknown id is registered bare so
    /// defensive callers still get a tracked run. On return the session
    /// has been unregistered.
    pub async fn drive(&self, id: &str, producer: &dyn Producer) -> SessionOutcome {
        if !self.registry.contains(id) {
            self.registry.register(id, RegisterOptions::tagged("stream"));
        }
        let cancel = self
            .registry
            .cancel_token(id)
            .unwrap_or_else(CancellationToken::new);

        let stream = match producer.open().await {
            Ok(stream) => stream,
            Err(e) => {
                // Terminal before any frame was produced.
                let content = self.registry.fail(id).unwrap_or_default();
                let message = e.to_string();
                self.sink.on_error(id, &message);
                self.registry.unregister(id);
                return SessionOutcome {
                    id: id.to_string(),
                    status: SessionStatus::Failed,
                    content,
                    error: Some(message),
                };
            }
        };

        let frames = decode_frames(stream);
        tokio::pin!(frames);

        let timeout = async {
            match self.config.timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    return self.settle_aborted(id, "cancelled");
                }
                () = &mut timeout => {
                    cancel.cancel();
                    return self.settle_aborted(id, "timed out");
                }
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(outcome) = self.dispatch(id, &frame) {
                            return outcome;
                        }
                    }
                    Some(Err(DecodeError::Transport(e))) => {
                        // A read rejection caused by our own cancellation is
                        // a normal termination, not a failure.
                        if cancel.is_cancelled() {
                            return self.settle_aborted(id, "cancelled");
                        }
                        return self.settle_failed(id, &e.message);
                    }
                    None => {
                        // Clean close without an explicit done event still
                        // finalizes from the accumulator.
                        return self.settle_done(id);
                    }
                },
            }
        }
    }

    /// Route one frame; `Some` means the session reached a terminal state.
    fn dispatch(&self, id: &str, frame: &Frame) -> Option<SessionOutcome> {
        let event = frame.event.as_str();

        if self.config.content_events.iter().any(|e| e == event) {
            if let Some(routed) = self.registry.append_content(id, &frame.data) {
                if routed.deliver {
                    self.sink.on_content(id, &frame.data, &routed.accumulated);
                }
            }
            return None;
        }
        if self.config.done_events.iter().any(|e| e == event) {
            return Some(self.settle_done(id));
        }
        if self.config.error_events.iter().any(|e| e == event) {
            return Some(self.settle_failed(id, &frame.data));
        }

        // Unknown event types are forward-compatible no-ops.
        debug!(id = %id, event = %event, "pass-through event");
        self.sink.on_event(id, frame);
        None
    }

    fn settle_done(&self, id: &str) -> SessionOutcome {
        let content = self
            .registry
            .finish(id)
            .or_else(|| self.registry.accumulated(id))
            .unwrap_or_default();
        self.sink.on_done(id, &content);
        self.registry.unregister(id);
        SessionOutcome {
            id: id.to_string(),
            status: SessionStatus::Done,
            content,
            error: None,
        }
    }

    fn settle_failed(&self, id: &str, message: &str) -> SessionOutcome {
        warn!(id = %id, error = %message, "session failed");
        let content = self
            .registry
            .fail(id)
            .or_else(|| self.registry.accumulated(id))
            .unwrap_or_default();
        self.sink.on_error(id, message);
        self.registry.unregister(id);
        SessionOutcome {
            id: id.to_string(),
            status: SessionStatus::Failed,
            content,
            error: Some(message.to_string()),
        }
    }

    fn settle_aborted(&self, id: &str, reason: &str) -> SessionOutcome {
        debug!(id = %id, reason = %reason, "session aborted");
        let content = self.registry.accumulated(id).unwrap_or_default();
        // No user-visible error for a cancellation.
        self.registry.abort(id);
        self.registry.unregister(id);
        SessionOutcome {
            id: id.to_string(),
            status: SessionStatus::Aborted,
            content,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use canvas_streams_core::{ByteStream, ProducerError, TransportError};
    use canvas_streams_session::SessionState;
    use futures::StreamExt as _;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    /// Producer that replays a fixed chunk script.
    struct ScriptedProducer {
        chunks: Mutex<Vec<Result<Bytes, TransportError>>>,
    }

    impl ScriptedProducer {
        fn from_text(chunks: &[&str]) -> Self {
            Self {
                chunks: Mutex::new(
                    chunks
                        .iter()
                        .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl Producer for ScriptedProducer {
        async fn open(&self) -> Result<ByteStream, ProducerError> {
            let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    /// Producer whose handshake is rejected.
    struct RejectedProducer;

    #[async_trait]
    impl Producer for RejectedProducer {
        async fn open(&self) -> Result<ByteStream, ProducerError> {
            Err(ProducerError::Handshake {
                status: 401,
                message: "invalid api key".into(),
            })
        }
    }

    /// Producer backed by a channel that never delivers.
    struct StalledProducer;

    #[async_trait]
    impl Producer for StalledProducer {
        async fn open(&self) -> Result<ByteStream, ProducerError> {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            // Leak the sender so the stream stays pending forever.
            std::mem::forget(tx);
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }
    }

    /// Sink that records every callback.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ContentSink for RecordingSink {
        fn on_content(&self, id: &str, delta: &str, _accumulated: &str) {
            self.calls.lock().unwrap().push(format!("content:{id}:{delta}"));
        }
        fn on_event(&self, id: &str, frame: &Frame) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("event:{id}:{}", frame.event));
        }
        fn on_done(&self, id: &str, content: &str) {
            self.calls.lock().unwrap().push(format!("done:{id}:{content}"));
        }
        fn on_error(&self, id: &str, message: &str) {
            self.calls.lock().unwrap().push(format!("error:{id}:{message}"));
        }
    }

    fn driver() -> (Arc<SessionRegistry>, Arc<RecordingSink>, SessionDriver) {
        let registry = Arc::new(SessionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let driver = SessionDriver::new(Arc::clone(&registry), Arc::clone(&sink) as _);
        (registry, sink, driver)
    }

    #[tokio::test]
    async fn drives_a_chat_reply_to_done() {
        let (registry, sink, driver) = driver();
        registry.register("reply-1", RegisterOptions::tagged("chat"));

        let producer = ScriptedProducer::from_text(&[
            "event: message\ndata: Hello\n\n",
            "event: message\ndata:  world\n\nevent: done\ndata: \n\n",
        ]);
        let outcome = driver.drive("reply-1", &producer).await;

        assert_eq!(outcome.status, SessionStatus::Done);
        assert_eq!(outcome.content, "Hello world");
        assert!(!registry.contains("reply-1"));
        assert_eq!(
            sink.calls(),
            vec![
                "content:reply-1:Hello",
                "content:reply-1: world",
                "done:reply-1:Hello world",
            ]
        );
    }

    #[tokio::test]
    async fn clean_close_without_done_event_finalizes() {
        let (_, sink, driver) = driver();
        let producer = ScriptedProducer::from_text(&["data: partial answer\n\n"]);

        let outcome = driver.drive("reply-1", &producer).await;
        assert_eq!(outcome.status, SessionStatus::Done);
        assert_eq!(outcome.content, "partial answer");
        assert!(sink.calls().contains(&"done:reply-1:partial answer".to_string()));
    }

    #[tokio::test]
    async fn handshake_rejection_fails_before_any_frame() {
        let (registry, sink, driver) = driver();
        registry.register("reply-1", RegisterOptions::tagged("chat"));

        let outcome = driver.drive("reply-1", &RejectedProducer).await;
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert!(outcome.error.unwrap().contains("invalid api key"));
        assert!(!registry.contains("reply-1"));
        assert_eq!(sink.calls().len(), 1);
        assert!(sink.calls()[0].starts_with("error:reply-1:"));
    }

    #[tokio::test]
    async fn error_event_fails_with_payload_message() {
        let (_, sink, driver) = driver();
        let producer = ScriptedProducer::from_text(&[
            "data: some\n\nevent: error\ndata: rate limit exceeded\n\n",
        ]);

        let outcome = driver.drive("reply-1", &producer).await;
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(outcome.content, "some");
        assert!(sink.calls().contains(&"error:reply-1:rate limit exceeded".to_string()));
    }

    #[tokio::test]
    async fn unknown_events_pass_through_without_failing() {
        let (_, sink, driver) = driver();
        let producer = ScriptedProducer::from_text(&[
            "event: sources\ndata: [{\"url\":\"x\"}]\n\nevent: brand_new_event\ndata: ?\n\ndata: ok\n\n",
        ]);

        let outcome = driver.drive("reply-1", &producer).await;
        assert_eq!(outcome.status, SessionStatus::Done);
        assert_eq!(outcome.content, "ok");
        assert!(sink.calls().contains(&"event:reply-1:sources".to_string()));
        assert!(sink.calls().contains(&"event:reply-1:brand_new_event".to_string()));
    }

    #[tokio::test]
    async fn cancellation_aborts_without_user_visible_error() {
        let (registry, sink, driver) = driver();
        let token = CancellationToken::new();
        registry.register(
            "reply-1",
            RegisterOptions::tagged("chat").with_cancel(token.clone()),
        );

        let drive = driver.drive("reply-1", &StalledProducer);
        tokio::pin!(drive);

        // Let the driver reach its read loop, then cancel.
        tokio::select! {
            _ = &mut drive => panic!("must not settle while stalled"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        token.cancel();
        let outcome = drive.await;

        assert_eq!(outcome.status, SessionStatus::Aborted);
        assert!(outcome.error.is_none());
        assert!(!registry.contains("reply-1"));
        assert!(sink.calls().iter().all(|c| !c.starts_with("error:")));
    }

    #[tokio::test]
    async fn timeout_follows_the_cancellation_path() {
        let registry = Arc::new(SessionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let driver = SessionDriver::with_config(
            Arc::clone(&registry),
            Arc::clone(&sink) as _,
            DriverConfig::default().with_timeout(Duration::from_millis(20)),
        );

        let outcome = driver.drive("reply-1", &StalledProducer).await;
        assert_eq!(outcome.status, SessionStatus::Aborted);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn paused_session_accumulates_without_delivery() {
        let (registry, sink, driver) = driver();
        registry.register("reply-1", RegisterOptions::tagged("chat"));
        registry.pause("reply-1");

        let producer = ScriptedProducer::from_text(&[
            "data: a\n\ndata: b\n\ndata: c\n\nevent: done\ndata: \n\n",
        ]);
        let outcome = driver.drive("reply-1", &producer).await;

        // Done supersedes pause; accumulator lost nothing.
        assert_eq!(outcome.status, SessionStatus::Done);
        assert_eq!(outcome.content, "abc");
        assert!(sink.calls().iter().all(|c| !c.starts_with("content:")));
        assert!(sink.calls().contains(&"done:reply-1:abc".to_string()));
    }

    #[tokio::test]
    async fn transport_error_mid_flight_keeps_partial_content() {
        let (registry, _, driver) = driver();
        registry.register("reply-1", RegisterOptions::tagged("chat"));

        struct HalfBrokenProducer;
        #[async_trait]
        impl Producer for HalfBrokenProducer {
            async fn open(&self) -> Result<ByteStream, ProducerError> {
                let chunks: Vec<Result<Bytes, TransportError>> = vec![
                    Ok(Bytes::from_static(b"data: so far\n\n")),
                    Err(TransportError::new("connection reset")),
                ];
                Ok(futures::stream::iter(chunks).boxed())
            }
        }

        let outcome = driver.drive("reply-1", &HalfBrokenProducer).await;
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(outcome.content, "so far");
        assert!(outcome.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn driver_registers_unknown_ids_defensively() {
        let (registry, _, driver) = driver();
        let producer = ScriptedProducer::from_text(&["event: done\ndata: \n\n"]);

        let outcome = driver.drive("adhoc", &producer).await;
        assert_eq!(outcome.status, SessionStatus::Done);
        assert!(!registry.contains("adhoc"));
        assert_ne!(registry.state("adhoc"), Some(SessionState::Streaming));
    }
}
