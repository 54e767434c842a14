//! Sink contract: callbacks the core invokes with decoded content.

use crate::frame::Frame;

/// Consumer-side callbacks for one or more sessions.
///
/// The owning feature (chat panel, committee view, matrix grid) implements
/// this to render content as it arrives. Delivery of `on_content` is
/// suppressed while a session is paused; the accumulator keeps growing and
/// the next delivery after resume carries the full backlog.
pub trait ContentSink: Send + Sync {
    /// A content-bearing frame was routed to `id`.
    ///
    /// `delta` is the payload of this frame alone; `accumulated` is the
    /// full content received so far, including `delta`.
    fn on_content(&self, id: &str, delta: &str, accumulated: &str);

    /// A non-content frame (status, sources, log, ...) was routed to `id`.
    ///
    /// Unknown event names must be tolerated; the default implementation
    /// ignores them.
    fn on_event(&self, id: &str, frame: &Frame) {
        let _ = (id, frame);
    }

    /// The session reached `done`; `content` is the authoritative final
    /// text, superseding any chunk-by-chunk partial render.
    fn on_done(&self, id: &str, content: &str);

    /// The session failed with a transport or handshake error. The
    /// accumulator-so-far is still available through `on_done`-less state;
    /// `message` is the failure description to surface to the user.
    fn on_error(&self, id: &str, message: &str);
}
