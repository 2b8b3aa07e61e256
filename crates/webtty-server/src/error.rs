use std::io;

use webtty_core::{MasterError, SlaveError, WebTtyError};

/// Errors from serving connections.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
    #[error("failed to authenticate websocket connection: {0}")]
    HandshakeRead(#[source] MasterError),
    #[error("failed to authenticate websocket connection: invalid message type")]
    UnexpectedMessage,
    #[error("failed to authenticate websocket connection: {0}")]
    MalformedInit(#[source] serde_json::Error),
    #[error("failed to authenticate websocket connection: invalid token")]
    AuthFailed,
    #[error("failed to create backend: {0}")]
    Spawn(#[source] SlaveError),
    #[error(transparent)]
    Session(#[from] WebTtyError),
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// True for a session that ended because a side hung up or the server
    /// stopped.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Session(e) => e.is_disconnect(),
            Self::ShuttingDown => true,
            _ => false,
        }
    }
}
