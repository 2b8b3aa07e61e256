use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use webtty_core::{Master, MasterError, TransportMessage};

/// A [`Master`] backed by an accepted websocket.
///
/// The socket is split so a read blocked on the stream half never holds up
/// writes on the sink half. `close` also wakes up any pending read.
pub struct WsMaster {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: CancellationToken,
}

impl WsMaster {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }

    /// Send a close frame and fail every later read.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Websocket already closed: {e}");
        }
    }
}

#[async_trait]
impl Master for WsMaster {
    async fn read_message(&self) -> Result<TransportMessage, MasterError> {
        let mut stream = self.stream.lock().await;
        let next = tokio::select! {
            _ = self.closed.cancelled() => return Err(MasterError::Closed),
            next = stream.next() => next,
        };

        match next {
            None | Some(Ok(Message::Close(_))) => Err(MasterError::Closed),
            Some(Err(e)) => Err(MasterError::Transport(Box::new(e))),
            Some(Ok(Message::Text(text))) => Ok(TransportMessage::Text(text.into_bytes())),
            Some(Ok(Message::Binary(data))) => Ok(TransportMessage::Binary(data)),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(TransportMessage::Control),
        }
    }

    async fn write_text(&self, text: String) -> Result<(), MasterError> {
        if self.closed.is_cancelled() {
            return Err(MasterError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| MasterError::Transport(Box::new(e)))
    }
}
