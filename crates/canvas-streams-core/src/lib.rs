//! Core abstractions for streaming canvas chat sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Frame` - One decoded server-sent event
//! - `decode_frames` - Incremental SSE frame decoder
//! - `Producer` - What the network layer must provide to the core
//! - `ContentSink` - Callbacks the core invokes with decoded content

pub mod decode;
pub mod frame;
pub mod producer;
pub mod sink;

pub use decode::{DecodeError, decode_frames};
pub use frame::Frame;
pub use producer::{ByteStream, Producer, ProducerError, TransportError};
pub use sink::ContentSink;
