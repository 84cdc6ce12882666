//! Duplex transports carrying wire events between a session and the model.
//!
//! A [`TransportConnector`] opens one [`DuplexChannel`] per session. The sink
//! half is shared between the ingress forwarder and the response receiver,
//! so every adapter funnels sends through a single queue to keep writes
//! serialized. The source half is owned by the response receiver alone.
//!
//! # Adapters
//!
//! - [`memory`] - In-process channel for tests and loopback
//! - [`websocket`] - JSON text frames over a WebSocket
//! - `bedrock` - Amazon Bedrock bidirectional stream (feature `bedrock`)

#[cfg(feature = "bedrock")]
pub mod bedrock;
pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum time to wait for a transport to come up.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The channel was already closed
    #[error("Channel closed")]
    Closed,

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Outbound half of a duplex channel.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Queue one encoded wire event.
    async fn send(&self, event: String) -> TransportResult<()>;

    /// Close the outbound half. Later sends fail with [`TransportError::Closed`].
    async fn close(&self) -> TransportResult<()>;
}

/// Inbound half of a duplex channel.
#[async_trait]
pub trait EventSource: Send {
    /// Next inbound message, or `None` at end of stream.
    async fn receive(&mut self) -> TransportResult<Option<String>>;
}

/// Both halves of an open channel.
pub struct DuplexChannel {
    pub sink: Arc<dyn EventSink>,
    pub source: Box<dyn EventSource>,
}

impl fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexChannel").finish_non_exhaustive()
    }
}

/// Opens duplex channels.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self) -> TransportResult<DuplexChannel>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Supported transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Amazon Bedrock bidirectional stream
    #[default]
    Bedrock,
    /// WebSocket proxy or mock server
    WebSocket,
}

impl TransportKind {
    /// Parse a transport kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bedrock" | "aws" => Some(TransportKind::Bedrock),
            "websocket" | "ws" => Some(TransportKind::WebSocket),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Bedrock => "bedrock",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
