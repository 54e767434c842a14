//! Session tracking and group lifecycle for canvas chat streams.
//!
//! Provides:
//! - `SessionRegistry` - Table of active sessions with group operations
//! - `TransportGroup` - Shared-connection handle for multiplexed sessions
//! - `SessionHandlers` - Per-feature stop/continue strategy callbacks

pub mod group;
pub mod registry;
pub mod session;

pub use group::TransportGroup;
pub use registry::{
    Appended, RegisterOptions, RegistryHooks, SessionRegistry, UnregisterOptions,
};
pub use session::{GroupId, SessionHandlers, SessionId, SessionInfo, SessionState};
