//! The protocol engine for one connection.
//!
//! [`WebTty`] pairs a [`Master`] with a [`Slave`] and runs two pumps until
//! one of them ends:
//!
//! - slave -> master: terminal output is framed as `Output` and sent.
//! - master -> slave: client frames are decoded and dispatched.
//!
//! Every outbound frame goes through a single mutex, so frames from the two
//! pumps never interleave. `run` does not close either endpoint when it
//! returns. The pump still blocked on a read exits once the caller closes the
//! Slave or the Master.

use std::sync::Arc;

use log::{debug, trace};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::master::{Master, MasterError, TransportMessage};
use crate::protocol::{InboundFrame, OutboundFrame, ProtocolError, ResizeRequest};
use crate::slave::{Slave, SlaveError};

/// Default number of bytes read from the slave per `Output` frame.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Session settings, fixed for the lifetime of a [`WebTty`].
#[derive(Debug, Clone)]
pub struct WebTtyConfig {
    /// Forward client `Input` frames to the slave.
    pub permit_write: bool,
    /// Fixed terminal width. 0 uses the width reported by the client.
    pub fixed_width: u16,
    /// Fixed terminal height. 0 uses the height reported by the client.
    pub fixed_height: u16,
    pub buffer_size: usize,
    /// Reconnect delay in seconds announced to the client, if enabled.
    pub reconnect: Option<u32>,
    /// Terminal preferences forwarded to the client untouched.
    pub preferences: Option<serde_json::Value>,
}

impl Default for WebTtyConfig {
    fn default() -> Self {
        Self {
            permit_write: false,
            fixed_width: 0,
            fixed_height: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reconnect: None,
            preferences: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum WebTtyError {
    #[error("master closed")]
    MasterClosed,
    #[error("slave closed")]
    SlaveClosed,
    #[error("session cancelled")]
    Cancelled,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to send message to connection: {0}")]
    MasterWrite(#[source] MasterError),
    #[error("failed to write received data to tty: {0}")]
    SlaveWrite(#[source] SlaveError),
    #[error("failed to send initializing message: {0}")]
    Initialize(#[source] SlaveError),
    #[error("invalid session configuration: {0}")]
    InvalidConfig(&'static str),
}

impl WebTtyError {
    /// True when one side went away, as opposed to a protocol or I/O failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            WebTtyError::MasterClosed | WebTtyError::SlaveClosed | WebTtyError::Cancelled
        )
    }
}

/// State shared by the two pumps.
struct Shared {
    master: Arc<dyn Master>,
    slave: Arc<dyn Slave>,
    config: WebTtyConfig,
    /// Serializes every write to the master.
    write_lock: Mutex<()>,
}

impl Shared {
    async fn send(&self, frame: OutboundFrame<'_>) -> Result<(), WebTtyError> {
        let text = frame.encode();
        let _guard = self.write_lock.lock().await;
        self.master
            .write_text(text)
            .await
            .map_err(WebTtyError::MasterWrite)
    }

    async fn send_initialize(&self) -> Result<(), WebTtyError> {
        let title = self.slave.window_title().map_err(WebTtyError::Initialize)?;
        self.send(OutboundFrame::SetWindowTitle(&title)).await?;

        if let Some(seconds) = self.config.reconnect {
            self.send(OutboundFrame::SetReconnect(seconds)).await?;
        }
        if let Some(preferences) = &self.config.preferences {
            self.send(OutboundFrame::SetPreferences(preferences)).await?;
        }
        Ok(())
    }

    async fn handle_master_message(&self, data: &[u8]) -> Result<(), WebTtyError> {
        match InboundFrame::decode(data)? {
            InboundFrame::Input(payload) => {
                if !self.config.permit_write || payload.is_empty() {
                    return Ok(());
                }
                self.slave
                    .write(payload)
                    .await
                    .map_err(WebTtyError::SlaveWrite)?;
            }
            InboundFrame::Ping => {
                self.send(OutboundFrame::Pong).await?;
            }
            InboundFrame::ResizeTerminal(request) => {
                let (columns, rows) = self.resolve_size(&request);
                if let Err(e) = self.slave.resize_terminal(columns, rows).await {
                    debug!("Ignoring resize to {columns}x{rows}: {e}");
                }
            }
        }
        Ok(())
    }

    /// Fixed dimensions win over the ones the client asked for.
    fn resolve_size(&self, request: &ResizeRequest) -> (u16, u16) {
        let columns = match self.config.fixed_width {
            0 => request.columns(),
            fixed => fixed,
        };
        let rows = match self.config.fixed_height {
            0 => request.rows(),
            fixed => fixed,
        };
        (columns, rows)
    }
}

async fn pump_slave(shared: Arc<Shared>) -> WebTtyError {
    let mut buf = vec![0u8; shared.config.buffer_size];
    loop {
        let n = match shared.slave.read(&mut buf).await {
            Ok(0) => return WebTtyError::SlaveClosed,
            Ok(n) => n,
            Err(e) => {
                debug!("Slave read failed: {e}");
                return WebTtyError::SlaveClosed;
            }
        };
        trace!("Forwarding {n} bytes of output");

        if let Err(e) = shared.send(OutboundFrame::Output(&buf[..n])).await {
            return e;
        }
    }
}

async fn pump_master(shared: Arc<Shared>) -> WebTtyError {
    loop {
        let data = match shared.master.read_message().await {
            Ok(TransportMessage::Text(data)) => data,
            Ok(_) => continue,
            Err(e) => {
                debug!("Master read failed: {e}");
                return WebTtyError::MasterClosed;
            }
        };

        if let Err(e) = shared.handle_master_message(&data).await {
            return e;
        }
    }
}

/// Bridges one Master to one Slave for the duration of a connection.
pub struct WebTty {
    shared: Arc<Shared>,
}

impl WebTty {
    pub fn new(
        master: Arc<dyn Master>,
        slave: Arc<dyn Slave>,
        config: WebTtyConfig,
    ) -> Result<Self, WebTtyError> {
        if config.buffer_size == 0 {
            return Err(WebTtyError::InvalidConfig(
                "buffer size must be greater than zero",
            ));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                master,
                slave,
                config,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &WebTtyConfig {
        &self.shared.config
    }

    /// Run the session until a pump ends or `cancel` fires.
    ///
    /// The session always ends with an error describing why; use
    /// [`WebTtyError::is_disconnect`] to tell a normal hang-up from a failure.
    /// Cancellation is only observed here, while the initial frames are sent
    /// and while the pumps run. A pump blocked in a read keeps waiting until
    /// the caller closes the corresponding endpoint.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WebTtyError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(WebTtyError::Cancelled),
            result = self.shared.send_initialize() => result?,
        }

        let (tx, mut rx) = mpsc::channel(2);

        let shared = Arc::clone(&self.shared);
        let slave_tx = tx.clone();
        tokio::spawn(async move {
            let _ = slave_tx.send(pump_slave(shared).await).await;
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _ = tx.send(pump_master(shared).await).await;
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(WebTtyError::Cancelled),
            Some(err) = rx.recv() => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::task::JoinHandle;

    const TITLE: &str = "test-title";

    struct TestMaster {
        inbound: Mutex<UnboundedReceiver<TransportMessage>>,
        outbound: UnboundedSender<String>,
    }

    #[async_trait]
    impl Master for TestMaster {
        async fn read_message(&self) -> Result<TransportMessage, MasterError> {
            self.inbound.lock().await.recv().await.ok_or(MasterError::Closed)
        }

        async fn write_text(&self, text: String) -> Result<(), MasterError> {
            self.outbound.send(text).map_err(|_| MasterError::Closed)
        }
    }

    struct SlaveOutput {
        rx: UnboundedReceiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    /// Emits queued chunks, records writes and resizes. Resizing to a zero
    /// dimension fails.
    struct TestSlave {
        output: Mutex<SlaveOutput>,
        writes: std::sync::Mutex<Vec<Vec<u8>>>,
        resizes: std::sync::Mutex<Vec<(u16, u16)>>,
        fail_writes: AtomicBool,
    }

    impl TestSlave {
        fn new() -> (Arc<Self>, UnboundedSender<Vec<u8>>) {
            let (tx, rx) = unbounded_channel();
            let slave = Arc::new(Self {
                output: Mutex::new(SlaveOutput {
                    rx,
                    pending: Vec::new(),
                }),
                writes: std::sync::Mutex::new(Vec::new()),
                resizes: std::sync::Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
            });
            (slave, tx)
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        fn resizes(&self) -> Vec<(u16, u16)> {
            self.resizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Slave for TestSlave {
        async fn read(&self, buf: &mut [u8]) -> Result<usize, SlaveError> {
            let mut output = self.output.lock().await;
            if output.pending.is_empty() {
                match output.rx.recv().await {
                    Some(chunk) => output.pending = chunk,
                    None => return Ok(0),
                }
            }
            let n = output.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&output.pending[..n]);
            output.pending.drain(..n);
            Ok(n)
        }

        async fn write(&self, data: &[u8]) -> Result<(), SlaveError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SlaveError::Io(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn resize_terminal(&self, columns: u16, rows: u16) -> Result<(), SlaveError> {
            if columns == 0 || rows == 0 {
                return Err(SlaveError::Resize("zero dimension".into()));
            }
            self.resizes.lock().unwrap().push((columns, rows));
            Ok(())
        }

        fn window_title(&self) -> Result<String, SlaveError> {
            Ok(TITLE.to_string())
        }

        async fn close(&self) -> Result<(), SlaveError> {
            Ok(())
        }
    }

    /// Accepts `limit` writes, then fails every later one. Writes block
    /// forever when `stall` is set.
    struct LimitedMaster {
        limit: usize,
        stall: bool,
        written: AtomicUsize,
    }

    impl LimitedMaster {
        fn new(limit: usize) -> Arc<Self> {
            Arc::new(Self {
                limit,
                stall: false,
                written: AtomicUsize::new(0),
            })
        }

        fn stalled() -> Arc<Self> {
            Arc::new(Self {
                limit: usize::MAX,
                stall: true,
                written: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Master for LimitedMaster {
        async fn read_message(&self) -> Result<TransportMessage, MasterError> {
            std::future::pending().await
        }

        async fn write_text(&self, _text: String) -> Result<(), MasterError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            if self.written.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(MasterError::Transport("socket reset".into()));
            }
            Ok(())
        }
    }

    struct Session {
        client: UnboundedSender<TransportMessage>,
        frames: UnboundedReceiver<String>,
        output: UnboundedSender<Vec<u8>>,
        slave: Arc<TestSlave>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<(), WebTtyError>>,
    }

    impl Session {
        fn start(config: WebTtyConfig) -> Self {
            let (client, inbound) = unbounded_channel();
            let (outbound, frames) = unbounded_channel();
            let master = Arc::new(TestMaster {
                inbound: Mutex::new(inbound),
                outbound,
            });
            let (slave, output) = TestSlave::new();

            let tty = WebTty::new(master, slave.clone(), config).unwrap();
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let handle = tokio::spawn(async move { tty.run(token).await });

            Self {
                client,
                frames,
                output,
                slave,
                cancel,
                handle,
            }
        }

        /// Start a session and consume the initial title frame.
        async fn started(config: WebTtyConfig) -> Self {
            let mut session = Self::start(config);
            assert_eq!(session.next_frame().await, format!("3{TITLE}"));
            session
        }

        fn send(&self, data: &[u8]) {
            self.client
                .send(TransportMessage::Text(data.to_vec()))
                .unwrap();
        }

        async fn next_frame(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("master dropped")
        }

        /// Ping and wait for the pong, so every earlier frame has been handled.
        async fn sync(&mut self) {
            self.send(b"2");
            assert_eq!(self.next_frame().await, "2");
        }

        async fn outcome(self) -> Result<(), WebTtyError> {
            tokio::time::timeout(Duration::from_secs(5), self.handle)
                .await
                .expect("session did not end")
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_initialize_frames() {
        let config = WebTtyConfig {
            reconnect: Some(10),
            preferences: Some(serde_json::json!({ "font_size": 14 })),
            ..Default::default()
        };
        let mut session = Session::start(config);

        assert_eq!(session.next_frame().await, "3test-title");
        assert_eq!(session.next_frame().await, "510");
        assert_eq!(session.next_frame().await, r#"4{"font_size":14}"#);
    }

    #[tokio::test]
    async fn test_output_is_one_base64_frame() {
        let mut session = Session::started(WebTtyConfig::default()).await;

        session.output.send(b"hello".to_vec()).unwrap();

        let frame = session.next_frame().await;
        assert_eq!(frame, "1aGVsbG8=");
        assert_eq!(STANDARD.decode(&frame[1..]).unwrap(), b"hello");

        session.sync().await;
        assert!(session.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_output_split_by_buffer_size() {
        let config = WebTtyConfig {
            buffer_size: 4,
            ..Default::default()
        };
        let mut session = Session::started(config).await;

        session.output.send(b"abcdefgh".to_vec()).unwrap();

        let first = session.next_frame().await;
        let second = session.next_frame().await;
        assert_eq!(STANDARD.decode(&first[1..]).unwrap(), b"abcd");
        assert_eq!(STANDARD.decode(&second[1..]).unwrap(), b"efgh");
    }

    #[tokio::test]
    async fn test_ping_yields_exactly_one_pong() {
        let mut session = Session::started(WebTtyConfig::default()).await;

        session.send(b"2");
        assert_eq!(session.next_frame().await, "2");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_input_dropped_without_permit_write() {
        let mut session = Session::started(WebTtyConfig::default()).await;

        for _ in 0..10 {
            session.send(b"1rm -rf /\r");
        }
        session.sync().await;

        assert!(session.slave.writes().is_empty());
    }

    #[tokio::test]
    async fn test_input_forwarded_with_permit_write() {
        let config = WebTtyConfig {
            permit_write: true,
            ..Default::default()
        };
        let mut session = Session::started(config).await;

        session.send(b"1ls\r");
        session.send(b"1");
        session.send(b"1\x1b[A");
        session.sync().await;

        assert_eq!(
            session.slave.writes(),
            vec![b"ls\r".to_vec(), b"\x1b[A".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_resize_uses_client_size() {
        let mut session = Session::started(WebTtyConfig::default()).await;

        session.send(br#"3{"columns":80,"rows":24}"#);
        session.sync().await;

        assert_eq!(session.slave.resizes(), vec![(80, 24)]);
    }

    #[tokio::test]
    async fn test_resize_fixed_height_overrides_rows() {
        let config = WebTtyConfig {
            fixed_height: 50,
            ..Default::default()
        };
        let mut session = Session::started(config).await;

        session.send(br#"3{"columns":80,"rows":24}"#);
        session.sync().await;

        assert_eq!(session.slave.resizes(), vec![(80, 50)]);
    }

    #[tokio::test]
    async fn test_resize_failure_keeps_session() {
        let mut session = Session::started(WebTtyConfig::default()).await;

        session.send(br#"3{"columns":0,"rows":0}"#);
        session.sync().await;

        assert!(session.slave.resizes().is_empty());
        assert!(!session.handle.is_finished());
    }

    #[tokio::test]
    async fn test_non_text_messages_ignored() {
        let config = WebTtyConfig {
            permit_write: true,
            ..Default::default()
        };
        let mut session = Session::started(config).await;

        session
            .client
            .send(TransportMessage::Binary(b"1binary".to_vec()))
            .unwrap();
        session.client.send(TransportMessage::Control).unwrap();
        session.sync().await;

        assert!(session.slave.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_ends_session() {
        let session = Session::started(WebTtyConfig::default()).await;

        session.send(b"9payload");

        let err = session.outcome().await.unwrap_err();
        assert!(matches!(
            err,
            WebTtyError::Protocol(ProtocolError::UnknownType(b'9'))
        ));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn test_zero_length_ends_session() {
        let session = Session::started(WebTtyConfig::default()).await;

        session.send(b"");

        let err = session.outcome().await.unwrap_err();
        assert!(matches!(err, WebTtyError::Protocol(ProtocolError::ZeroLength)));
    }

    #[tokio::test]
    async fn test_malformed_resize_ends_session() {
        let session = Session::started(WebTtyConfig::default()).await;

        session.send(b"3not json");

        let err = session.outcome().await.unwrap_err();
        assert!(matches!(
            err,
            WebTtyError::Protocol(ProtocolError::MalformedResize(_))
        ));
    }

    #[tokio::test]
    async fn test_master_closed() {
        let session = Session::started(WebTtyConfig::default()).await;
        let Session {
            client,
            frames,
            output,
            slave,
            cancel,
            handle,
        } = session;
        drop(client);

        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WebTtyError::MasterClosed));
        assert!(err.is_disconnect());
        drop((frames, output, slave, cancel));
    }

    #[tokio::test]
    async fn test_slave_closed() {
        let session = Session::started(WebTtyConfig::default()).await;
        let Session {
            client,
            frames,
            output,
            slave,
            cancel,
            handle,
        } = session;
        drop(output);

        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WebTtyError::SlaveClosed));
        drop((client, frames, slave, cancel));
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let session = Session::started(WebTtyConfig::default()).await;

        session.cancel.cancel();

        let err = session.outcome().await.unwrap_err();
        assert!(matches!(err, WebTtyError::Cancelled));
    }

    #[tokio::test]
    async fn test_slave_write_failure_ends_session() {
        let config = WebTtyConfig {
            permit_write: true,
            ..Default::default()
        };
        let session = Session::started(config).await;
        session.slave.fail_writes.store(true, Ordering::SeqCst);

        session.send(b"1x");

        assert!(matches!(
            session.outcome().await,
            Err(WebTtyError::SlaveWrite(SlaveError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn test_master_write_failure_ends_session() {
        let master = LimitedMaster::new(1);
        let (slave, output) = TestSlave::new();
        let tty = WebTty::new(master.clone(), slave, WebTtyConfig::default()).unwrap();

        output.send(b"lost".to_vec()).unwrap();
        let run = tty.run(CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("session did not end");

        let err = result.unwrap_err();
        assert!(matches!(err, WebTtyError::MasterWrite(MasterError::Transport(_))));
        assert!(!err.is_disconnect());
        assert_eq!(master.written.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initialize_failure_ends_session() {
        let (slave, _output) = TestSlave::new();
        let tty = WebTty::new(LimitedMaster::new(0), slave, WebTtyConfig::default()).unwrap();

        let result = tty.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(WebTtyError::MasterWrite(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_initialize() {
        let (slave, _output) = TestSlave::new();
        let tty = WebTty::new(LimitedMaster::stalled(), slave, WebTtyConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), tty.run(cancel))
            .await
            .expect("cancel was not observed while sending the title");
        assert!(matches!(result, Err(WebTtyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_zero_buffer_size_rejected() {
        let (client_tx, inbound) = unbounded_channel::<TransportMessage>();
        let (outbound, _frames) = unbounded_channel();
        let master = Arc::new(TestMaster {
            inbound: Mutex::new(inbound),
            outbound,
        });
        let (slave, _output) = TestSlave::new();
        let config = WebTtyConfig {
            buffer_size: 0,
            ..Default::default()
        };

        let result = WebTty::new(master, slave, config);
        assert!(matches!(result, Err(WebTtyError::InvalidConfig(_))));
        drop(client_tx);
    }

    /// Writes each frame to a shared wire one byte at a time, yielding between
    /// bytes, so unsynchronized writers would interleave.
    struct ByteWiseMaster {
        inbound: Mutex<UnboundedReceiver<TransportMessage>>,
        wire: std::sync::Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl Master for ByteWiseMaster {
        async fn read_message(&self) -> Result<TransportMessage, MasterError> {
            self.inbound.lock().await.recv().await.ok_or(MasterError::Closed)
        }

        async fn write_text(&self, text: String) -> Result<(), MasterError> {
            for byte in text.bytes().chain(std::iter::once(b'\n')) {
                self.wire.lock().unwrap().push(byte);
                tokio::task::yield_now().await;
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_frames_never_interleave() {
        const ROUNDS: usize = 200;
        let mut sessions = Vec::new();

        for _ in 0..2 {
            let (client, inbound) = unbounded_channel();
            let master = Arc::new(ByteWiseMaster {
                inbound: Mutex::new(inbound),
                wire: std::sync::Mutex::new(Vec::new()),
            });
            let (slave, output) = TestSlave::new();
            let tty = WebTty::new(master.clone(), slave, WebTtyConfig::default()).unwrap();
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move { tty.run(token).await });

            for i in 0..ROUNDS {
                output.send(format!("chunk-{i:03};").into_bytes()).unwrap();
                client.send(TransportMessage::Text(b"2".to_vec())).unwrap();
            }
            sessions.push((master, client, output, cancel));
        }

        let expected_output: String = (0..ROUNDS).map(|i| format!("chunk-{i:03};")).collect();

        for (master, _client, _output, cancel) in &sessions {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            loop {
                let wire = String::from_utf8(master.wire.lock().unwrap().clone()).unwrap();
                // A frame may be mid-write; only look at completed ones.
                let complete = &wire[..wire.rfind('\n').map_or(0, |i| i + 1)];
                let lines: Vec<&str> = complete.lines().collect();

                let mut pongs = 0;
                let mut output = Vec::new();
                for line in &lines {
                    match line.as_bytes().first() {
                        Some(b'2') => {
                            assert_eq!(*line, "2", "corrupted pong frame");
                            pongs += 1;
                        }
                        Some(b'1') => {
                            let decoded = STANDARD
                                .decode(&line[1..])
                                .unwrap_or_else(|e| panic!("corrupted output frame {line:?}: {e}"));
                            output.extend_from_slice(&decoded);
                        }
                        Some(b'3') => assert_eq!(*line, format!("3{TITLE}")),
                        _ => panic!("unexpected frame {line:?}"),
                    }
                }

                if pongs == ROUNDS && output.len() == expected_output.len() {
                    assert_eq!(String::from_utf8(output).unwrap(), expected_output);
                    break;
                }
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "timed out: {pongs} pongs, {} output bytes",
                    output.len()
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            cancel.cancel();
        }
    }
}
