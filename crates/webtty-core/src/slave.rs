use async_trait::async_trait;

/// Errors from the process side of a session.
#[derive(Debug, thiserror::Error)]
pub enum SlaveError {
    #[error("slave closed")]
    Closed,
    #[error("slave I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start command: {0}")]
    Spawn(String),
    #[error("terminal resize failed: {0}")]
    Resize(String),
    #[error("failed to render window title: {0}")]
    Title(String),
}

/// The process-facing endpoint of a session: a byte stream plus terminal
/// control.
///
/// The engine reads from one task and writes from another, so `read` must not
/// block `write`. Resize and title calls are rare and need no ordering
/// against the byte stream.
#[async_trait]
pub trait Slave: Send + Sync {
    /// Read terminal output into `buf`. `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SlaveError>;

    /// Write all of `data` to the terminal input.
    async fn write(&self, data: &[u8]) -> Result<(), SlaveError>;

    async fn resize_terminal(&self, columns: u16, rows: u16) -> Result<(), SlaveError>;

    /// Title the client should show for this session.
    fn window_title(&self) -> Result<String, SlaveError>;

    /// Terminate the process and release the terminal.
    ///
    /// Once this returns, a pending or future `read` yields end of stream.
    async fn close(&self) -> Result<(), SlaveError>;
}
