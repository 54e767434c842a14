//! Shared-transport group handle.

use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;
use crate::session::GroupId;

/// Handle for one physical connection carrying many multiplexed sessions.
///
/// The single cancellation token lives here and only here: it is never
/// attached to an individual member's `cancel` handle, because cancelling
/// the one connection would terminate every other multiplexed session.
/// Individually "stopping" a member only pauses it; [`Self::abort_all`] is
/// the sole path that cancels the transport.
#[derive(Debug, Clone)]
pub struct TransportGroup {
    group: GroupId,
    cancel: CancellationToken,
}

impl TransportGroup {
    /// Create a group handle with a fresh cancellation token.
    #[must_use]
    pub fn new(group: impl Into<GroupId>) -> Self {
        Self {
            group: group.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Group tag shared by the member sessions.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.group
    }

    /// The transport's cancellation token, for the read loop to select on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort everything: cancel the shared transport, transition every
    /// member to `aborted` and unregister them all.
    ///
    /// Returns the number of members that were removed.
    pub fn abort_all(&self, registry: &SessionRegistry) -> usize {
        self.cancel.cancel();
        registry.abort_group(&self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisterOptions;

    #[test]
    fn abort_all_cancels_transport_and_empties_group() {
        let registry = SessionRegistry::new();
        let transport = TransportGroup::new("committee-1");

        // Multiplexed members carry no cancel handle of their own.
        registry.register(
            "opinion-0",
            RegisterOptions::tagged("committee").with_group(transport.id()),
        );
        registry.register(
            "opinion-1",
            RegisterOptions::tagged("committee").with_group(transport.id()),
        );

        assert_eq!(transport.abort_all(&registry), 2);
        assert!(transport.token().is_cancelled());
        assert!(registry.group_members("committee-1").is_empty());
    }

    #[test]
    fn pausing_a_member_leaves_the_transport_alive() {
        let registry = SessionRegistry::new();
        let transport = TransportGroup::new("committee-1");
        registry.register(
            "opinion-0",
            RegisterOptions::tagged("committee").with_group(transport.id()),
        );

        assert!(registry.pause("opinion-0"));
        assert!(!transport.token().is_cancelled());
    }
}
