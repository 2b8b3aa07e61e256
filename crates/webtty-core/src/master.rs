use async_trait::async_trait;

/// One message as delivered by the transport.
///
/// Only text messages carry protocol frames. Binary and control messages
/// are surfaced so the engine can skip them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    /// Transport-level keepalives (e.g. websocket ping/pong).
    Control,
}

/// Errors from the network side of a session.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The network-facing endpoint of a session, usually a connection to a browser.
///
/// `read_message` and `write_text` may be called concurrently from different
/// tasks. Implementations only need to make each call atomic; the engine
/// already serializes its own writes.
#[async_trait]
pub trait Master: Send + Sync {
    /// Wait for the next message from the client.
    async fn read_message(&self) -> Result<TransportMessage, MasterError>;

    /// Send one text message to the client.
    async fn write_text(&self, text: String) -> Result<(), MasterError>;
}
