//! Producer contract: what the network layer must present to the core.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Incrementally-readable byte stream from one physical connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Mid-flight read failure on an open transport.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable failure description.
    pub message: String,
}

impl TransportError {
    /// Create a transport error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Producer error, terminal before any frame is produced.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The handshake was rejected (equivalent to a non-2xx HTTP status).
    #[error("handshake rejected ({status}): {message}")]
    Handshake {
        /// Status code reported by the remote end.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// The connection could not be established at all.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// An asynchronous call that yields a streaming response.
///
/// The core requires exactly (a) a success/failure indicator for the
/// initial handshake and (b) on success, an incrementally-readable byte
/// stream. Request construction, authentication, and provider specifics
/// all live behind this trait.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Open the connection and return its byte stream.
    ///
    /// # Errors
    /// Returns [`ProducerError`] when the handshake fails; no frames are
    /// ever produced for such a session.
    async fn open(&self) -> Result<ByteStream, ProducerError>;
}
