//! Session state for one logical generation task.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Session identifier, chosen by the owning feature (a node id, a matrix
/// cell key, a generated UUID). Unique across the registry at any instant.
pub type SessionId = String;

/// Group tag shared by related sessions for aggregate operations.
pub type GroupId = String;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Frames are arriving and being delivered to the sink.
    Streaming,
    /// Frames still accumulate but delivery to the sink is suppressed.
    Paused,
    /// Stream finished; the accumulator is the authoritative content.
    Done,
    /// Transport or handshake failure.
    Error,
    /// The owning transport's cancellation was invoked.
    Aborted,
}

impl SessionState {
    /// Whether the session has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Aborted)
    }
}

/// Stop/continue callback, invoked with the session id and the
/// accumulated content at the moment of the transition.
pub type HandlerFn = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Per-session strategy callbacks supplied by the owning feature.
///
/// Features use these to customize what "stop" and "continue" look like
/// beyond the default (e.g. rewriting displayed content with a paused
/// marker). Both are optional; an empty value means default behavior.
#[derive(Default)]
pub struct SessionHandlers {
    /// Runs when the session is paused or soft-stopped.
    pub on_stop: Option<HandlerFn>,
    /// Runs when a paused session resumes delivery.
    pub on_continue: Option<HandlerFn>,
}

impl SessionHandlers {
    /// Handlers with only a stop callback.
    #[must_use]
    pub fn on_stop(f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        Self {
            on_stop: Some(Box::new(f)),
            on_continue: None,
        }
    }
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("on_stop", &self.on_stop.is_some())
            .field("on_continue", &self.on_continue.is_some())
            .finish()
    }
}

/// Registry-owned state for one session.
///
/// Handlers sit behind an `Arc` so they can be invoked after the registry
/// lock is released.
pub(crate) struct Session {
    pub group: Option<GroupId>,
    pub state: SessionState,
    pub cancel: Option<CancellationToken>,
    pub accumulator: String,
    pub handlers: std::sync::Arc<SessionHandlers>,
    pub tag: String,
}

/// Read-only snapshot of a session for diagnostics and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Group membership, if any.
    pub group: Option<GroupId>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Owning feature, for diagnostics only.
    pub tag: String,
}
