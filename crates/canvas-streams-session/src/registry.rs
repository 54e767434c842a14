//! Process-scoped table of active sessions.
//!
//! The registry is the only shared mutable resource in the streaming core.
//! It is an explicit object owned by the application scope and passed by
//! reference to every feature that needs it, never a global. All operations
//! run to completion without a suspension point; hooks and handler
//! callbacks are invoked after the lock is released.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::{
    GroupId, Session, SessionHandlers, SessionId, SessionInfo, SessionState,
};

/// Observer for registry lifecycle transitions.
///
/// This is the seam for aggregate affordances: a single stop control for a
/// whole group is shown on `group_activated` (first member registered) and
/// hidden on `group_deactivated` (last member gone). All methods default
/// to no-ops.
pub trait RegistryHooks: Send + Sync {
    /// The first session of `group` was registered.
    fn group_activated(&self, group: &str) {
        let _ = group;
    }

    /// The last session of `group` was unregistered.
    fn group_deactivated(&self, group: &str) {
        let _ = group;
    }

    /// A session was unregistered (its default deactivation side effect).
    fn session_deactivated(&self, id: &str) {
        let _ = id;
    }
}

/// Options for [`SessionRegistry::register`].
#[derive(Default)]
pub struct RegisterOptions {
    /// Group tag for aggregate operations.
    pub group: Option<GroupId>,
    /// Hard cancellation handle for the session's own transport. Absent
    /// for sessions multiplexed on a shared transport (soft pause only).
    pub cancel: Option<CancellationToken>,
    /// Stop/continue strategy callbacks.
    pub handlers: SessionHandlers,
    /// Owning feature, for diagnostics only.
    pub tag: String,
}

impl RegisterOptions {
    /// Options carrying only a feature tag.
    #[must_use]
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Set the group tag.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attach a hard cancellation handle.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach stop/continue handlers.
    #[must_use]
    pub fn with_handlers(mut self, handlers: SessionHandlers) -> Self {
        self.handlers = handlers;
        self
    }
}

/// Options for [`SessionRegistry::unregister_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnregisterOptions {
    /// Skip the deactivation side effects. Callers that manage an
    /// aggregate affordance themselves (one indicator for a whole group)
    /// remove bookkeeping without triggering per-session deactivation.
    pub suppress_deactivation: bool,
}

/// Result of routing one content frame into a session's accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    /// Full content received so far, including this delta.
    pub accumulated: String,
    /// Whether the sink should be invoked (`false` while paused).
    pub deliver: bool,
}

/// Table of active sessions with group queries and group-level control.
///
/// Created once per application scope; cleared explicitly when the
/// surrounding user session is torn down or switched.
pub struct SessionRegistry {
    inner: RwLock<HashMap<SessionId, Session>>,
    hooks: Option<Arc<dyn RegistryHooks>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            hooks: None,
        }
    }

    /// Create a registry that notifies `hooks` on lifecycle transitions.
    #[must_use]
    pub fn with_hooks(hooks: Arc<dyn RegistryHooks>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            hooks: Some(hooks),
        }
    }

    fn group_len(map: &HashMap<SessionId, Session>, group: &str) -> usize {
        map.values()
            .filter(|s| s.group.as_deref() == Some(group))
            .count()
    }

    /// Register a session.
    ///
    /// Re-registering an id that is already present overwrites the prior
    /// entry; the superseded cancellation handle is dropped, not invoked.
    /// Callers intending a clean restart must `unregister` first —
    /// failing to do so leaks the ability to cancel the old operation.
    pub fn register(&self, id: impl Into<SessionId>, options: RegisterOptions) {
        let id = id.into();
        let mut activated: Option<GroupId> = None;
        let mut deactivated: Option<GroupId> = None;

        {
            let mut map = self.inner.write().unwrap();

            let prior_group = map.get(&id).and_then(|s| s.group.clone());
            if map.contains_key(&id) {
                warn!(id = %id, "overwriting in-flight session; prior cancel handle dropped");
            }

            let new_group = options.group.clone();
            let group_was_empty = new_group
                .as_deref()
                .is_some_and(|g| Self::group_len(&map, g) == 0);

            map.insert(
                id.clone(),
                Session {
                    group: options.group,
                    state: SessionState::Streaming,
                    cancel: options.cancel,
                    accumulator: String::new(),
                    handlers: Arc::new(options.handlers),
                    tag: options.tag,
                },
            );

            // Overwrite may have emptied the superseded entry's group.
            if let Some(old) = prior_group {
                if Some(old.as_str()) != new_group.as_deref()
                    && Self::group_len(&map, &old) == 0
                {
                    deactivated = Some(old);
                }
            }
            if group_was_empty {
                activated = new_group;
            }
        }

        if let Some(hooks) = &self.hooks {
            if let Some(group) = deactivated {
                hooks.group_deactivated(&group);
            }
            if let Some(group) = activated {
                hooks.group_activated(&group);
            }
        }
        debug!(id = %id, "session registered");
    }

    /// Remove a session, triggering the default deactivation side effects.
    ///
    /// Unknown ids are a no-op: cleanup paths call this defensively from
    /// success, error, and abort branches alike.
    pub fn unregister(&self, id: &str) {
        self.unregister_with(id, UnregisterOptions::default());
    }

    /// Remove a session with explicit deactivation control.
    pub fn unregister_with(&self, id: &str, options: UnregisterOptions) {
        let removed_group;
        {
            let mut map = self.inner.write().unwrap();
            let Some(session) = map.remove(id) else {
                return;
            };
            removed_group = session
                .group
                .filter(|g| Self::group_len(&map, g) == 0);
        }

        if options.suppress_deactivation {
            return;
        }
        if let Some(hooks) = &self.hooks {
            hooks.session_deactivated(id);
            if let Some(group) = removed_group {
                hooks.group_deactivated(&group);
            }
        }
    }

    /// Live membership of a group; empty if it has no active sessions.
    #[must_use]
    pub fn group_members(&self, group: &str) -> Vec<SessionId> {
        let map = self.inner.read().unwrap();
        let mut members: Vec<SessionId> = map
            .iter()
            .filter(|(_, s)| s.group.as_deref() == Some(group))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort_unstable();
        members
    }

    /// Stop every member of a group.
    ///
    /// Members with their own cancellation handle are hard-cancelled
    /// (independent transports). Members without one are soft-stopped:
    /// flipped to `paused` with their `on_stop` handler run, because their
    /// transport is shared and cancelling it would kill siblings.
    ///
    /// Returns whether any member existed to stop.
    pub fn stop_group(&self, group: &str) -> bool {
        enum Stop {
            Hard(CancellationToken),
            Soft(String, Arc<SessionHandlers>, String),
        }

        let mut members = 0usize;
        let mut actions = Vec::new();
        {
            let mut map = self.inner.write().unwrap();
            for (id, session) in map.iter_mut() {
                if session.group.as_deref() != Some(group) {
                    continue;
                }
                members += 1;
                if let Some(cancel) = &session.cancel {
                    session.state = SessionState::Aborted;
                    actions.push(Stop::Hard(cancel.clone()));
                } else if session.state == SessionState::Streaming {
                    session.state = SessionState::Paused;
                    actions.push(Stop::Soft(
                        id.clone(),
                        Arc::clone(&session.handlers),
                        session.accumulator.clone(),
                    ));
                }
                // Members already paused or terminal need no action but
                // still count toward "anything existed to stop".
            }
        }

        for action in actions {
            match action {
                Stop::Hard(token) => token.cancel(),
                Stop::Soft(id, handlers, accumulated) => {
                    if let Some(on_stop) = &handlers.on_stop {
                        on_stop(&id, &accumulated);
                    }
                }
            }
        }
        members > 0
    }

    /// Append a content delta to a session's accumulator.
    ///
    /// The accumulator grows regardless of pause state; `deliver` tells
    /// the router whether the sink may be invoked. Terminal sessions
    /// (including cancelled ones) accept no further content.
    #[must_use]
    pub fn append_content(&self, id: &str, delta: &str) -> Option<Appended> {
        let mut map = self.inner.write().unwrap();
        let session = map.get_mut(id)?;
        if session.state.is_terminal() {
            return None;
        }
        session.accumulator.push_str(delta);
        Some(Appended {
            accumulated: session.accumulator.clone(),
            deliver: session.state == SessionState::Streaming,
        })
    }

    /// Pause delivery for a session. Content keeps accumulating; the
    /// transport stays untouched. Runs the session's `on_stop` handler.
    ///
    /// Returns `false` if the session is unknown or not streaming.
    pub fn pause(&self, id: &str) -> bool {
        let action;
        {
            let mut map = self.inner.write().unwrap();
            let Some(session) = map.get_mut(id) else {
                return false;
            };
            if session.state != SessionState::Streaming {
                return false;
            }
            session.state = SessionState::Paused;
            action = (Arc::clone(&session.handlers), session.accumulator.clone());
        }
        let (handlers, accumulated) = action;
        if let Some(on_stop) = &handlers.on_stop {
            on_stop(id, &accumulated);
        }
        true
    }

    /// Resume a paused session and return the full accumulated backlog.
    ///
    /// Runs the session's `on_continue` handler. The caller delivers the
    /// returned backlog to the sink; no per-chunk replay is needed because
    /// the accumulator is the backlog.
    #[must_use]
    pub fn resume(&self, id: &str) -> Option<String> {
        let (handlers, accumulated);
        {
            let mut map = self.inner.write().unwrap();
            let session = map.get_mut(id)?;
            if session.state != SessionState::Paused {
                return None;
            }
            session.state = SessionState::Streaming;
            handlers = Arc::clone(&session.handlers);
            accumulated = session.accumulator.clone();
        }
        if let Some(on_continue) = &handlers.on_continue {
            on_continue(id, &accumulated);
        }
        Some(accumulated)
    }

    /// Transition a session to `done`, regardless of pause state.
    ///
    /// Returns the authoritative final content (the accumulator), or
    /// `None` if the session is unknown or already terminal.
    #[must_use]
    pub fn finish(&self, id: &str) -> Option<String> {
        self.terminate(id, SessionState::Done)
    }

    /// Transition a session to `error`, returning the content-so-far.
    #[must_use]
    pub fn fail(&self, id: &str) -> Option<String> {
        self.terminate(id, SessionState::Error)
    }

    fn terminate(&self, id: &str, state: SessionState) -> Option<String> {
        let mut map = self.inner.write().unwrap();
        let session = map.get_mut(id)?;
        if session.state.is_terminal() {
            return None;
        }
        session.state = state;
        Some(session.accumulator.clone())
    }

    /// Hard-cancel one session's own transport and mark it aborted.
    ///
    /// Returns `false` if the session is unknown or already terminal.
    pub fn abort(&self, id: &str) -> bool {
        let token;
        {
            let mut map = self.inner.write().unwrap();
            let Some(session) = map.get_mut(id) else {
                return false;
            };
            if session.state.is_terminal() {
                return false;
            }
            session.state = SessionState::Aborted;
            token = session.cancel.clone();
        }
        if let Some(token) = token {
            token.cancel();
        }
        true
    }

    /// Abort and remove every member of a group at once.
    ///
    /// Used by shared-transport owners after cancelling the transport:
    /// each member is marked aborted and removed, with one group
    /// deactivation fired instead of per-member side effects.
    ///
    /// Returns the number of members removed.
    pub fn abort_group(&self, group: &str) -> usize {
        let mut tokens = Vec::new();
        let removed;
        {
            let mut map = self.inner.write().unwrap();
            let ids: Vec<SessionId> = map
                .iter()
                .filter(|(_, s)| s.group.as_deref() == Some(group))
                .map(|(id, _)| id.clone())
                .collect();
            removed = ids.len();
            for id in ids {
                if let Some(session) = map.remove(&id) {
                    if let Some(token) = session.cancel {
                        tokens.push(token);
                    }
                }
            }
        }

        for token in tokens {
            token.cancel();
        }
        if removed > 0 {
            if let Some(hooks) = &self.hooks {
                hooks.group_deactivated(group);
            }
        }
        removed
    }

    /// Cancel every remaining session and empty the table.
    ///
    /// Called on user-session teardown or switch. Fires one group
    /// deactivation per distinct group that still had members.
    pub fn clear(&self) {
        let mut tokens = Vec::new();
        let mut groups = Vec::new();
        {
            let mut map = self.inner.write().unwrap();
            for (_, session) in map.drain() {
                if let Some(token) = session.cancel {
                    tokens.push(token);
                }
                if let Some(group) = session.group {
                    if !groups.contains(&group) {
                        groups.push(group);
                    }
                }
            }
        }

        for token in tokens {
            token.cancel();
        }
        if let Some(hooks) = &self.hooks {
            for group in &groups {
                hooks.group_deactivated(group);
            }
        }
    }

    /// Current state of a session, if registered.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.inner.read().unwrap().get(id).map(|s| s.state)
    }

    /// Full content accumulated so far for a session.
    #[must_use]
    pub fn accumulated(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .get(id)
            .map(|s| s.accumulator.clone())
    }

    /// Clone of a session's cancellation token, if it has one.
    #[must_use]
    pub fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.inner.read().unwrap().get(id)?.cancel.clone()
    }

    /// Snapshot of a session for diagnostics.
    #[must_use]
    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.inner.read().unwrap().get(id).map(|s| SessionInfo {
            id: id.to_string(),
            group: s.group.clone(),
            state: s.state,
            tag: s.tag.clone(),
        })
    }

    /// Whether a session is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().unwrap().contains_key(id)
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}
