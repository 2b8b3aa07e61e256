use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, watch};
use webtty_core::{Slave, SlaveError};

use crate::options::{BackendSettings, CloseSignal};
use crate::title::TitleVars;

/// Bytes the reader thread takes from the pty per chunk.
const READ_CHUNK_SIZE: usize = 4096;

/// Chunks buffered between the reader thread and `read`.
const OUTPUT_QUEUE: usize = 32;

/// How long `read` keeps draining output after the command has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

const INITIAL_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Output received from the reader thread, plus the unread tail of the last
/// chunk when the caller's buffer was smaller than it.
struct Output {
    chunks: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// A local command running on its own pseudo-terminal.
///
/// Two named threads run alongside the command. The reader thread owns the
/// pty reader and forwards output over a channel, so a pending `read` holds
/// no shared thread. The watcher thread waits for the command to exit, then
/// closes the pty writer and flips the `closed` marker. Reads drain whatever
/// output is left and report end of stream once the marker is set.
pub struct LocalCommand {
    command: PathBuf,
    pid: Option<u32>,
    settings: BackendSettings,
    master: Mutex<Box<dyn MasterPty + Send>>,
    output: tokio::sync::Mutex<Output>,
    writer: SharedWriter,
    closed: watch::Receiver<bool>,
}

impl LocalCommand {
    /// Spawn `argv[0]` with the remaining arguments on a new pty.
    pub fn new(argv: &[String], settings: BackendSettings) -> Result<Self, SlaveError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SlaveError::Spawn("no command given".to_string()))?;
        let command = resolve_program(program)
            .ok_or_else(|| SlaveError::Spawn(format!("command `{program}` not found in PATH")))?;

        let pair = native_pty_system()
            .openpty(INITIAL_SIZE)
            .map_err(|e| SlaveError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&command);
        cmd.args(args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            SlaveError::Spawn(format!("failed to start command `{program}`: {e}"))
        })?;
        // Only the child may hold the slave side, otherwise reads never see EOF.
        drop(pair.slave);

        let mut killer = child.clone_killer();
        let pid = child.process_id();
        let master = pair.master;

        let handles = master
            .try_clone_reader()
            .and_then(|reader| master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = killer.kill();
                return Err(SlaveError::Spawn(format!("failed to attach to PTY: {e}")));
            }
        };

        let (chunks_tx, chunks) = mpsc::channel(OUTPUT_QUEUE);
        if let Err(e) = spawn_reader(reader, chunks_tx, pid) {
            let _ = killer.kill();
            return Err(e);
        }

        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));
        let (closed_tx, closed) = watch::channel(false);
        if let Err(e) = spawn_watcher(child, Arc::clone(&writer), closed_tx, pid) {
            let _ = killer.kill();
            return Err(e);
        }

        debug!("Started `{}` with pid {pid:?}", command.display());

        Ok(Self {
            command,
            pid,
            settings,
            master: Mutex::new(master),
            output: tokio::sync::Mutex::new(Output {
                chunks,
                pending: Vec::new(),
            }),
            writer,
            closed,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolved path of the executable.
    pub fn command(&self) -> &Path {
        &self.command
    }

    /// True once the command has exited and the pty is closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Send `signal` to the command. Does nothing once it has exited, since
    /// the pid may already belong to another process.
    fn signal(&self, signal: CloseSignal) {
        if self.is_closed() {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };

        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
        if rc != 0 {
            debug!(
                "Failed to send {signal} to pid {pid}: {}",
                io::Error::last_os_error()
            );
        }
    }

    /// Next chunk of output, or `None` at end of stream.
    ///
    /// Once the command has exited the reader thread gets a short grace period
    /// to hand over output still sitting in the pty.
    async fn next_chunk(&self, chunks: &mut mpsc::Receiver<Vec<u8>>) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            chunk = chunks.recv() => return chunk,
            _ = wait_closed(self.closed.clone()) => {}
        }
        tokio::time::timeout(DRAIN_GRACE, chunks.recv())
            .await
            .ok()
            .flatten()
    }
}

#[async_trait]
impl Slave for LocalCommand {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SlaveError> {
        let mut output = self.output.lock().await;
        if output.pending.is_empty() {
            let Output { chunks, pending } = &mut *output;
            match self.next_chunk(chunks).await {
                Some(chunk) => *pending = chunk,
                None => return Ok(0),
            }
        }

        let n = output.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&output.pending[..n]);
        output.pending.drain(..n);
        Ok(n)
    }

    async fn write(&self, data: &[u8]) -> Result<(), SlaveError> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), SlaveError> {
            let mut guard = writer.lock().map_err(|_| SlaveError::Closed)?;
            let writer = guard.as_mut().ok_or(SlaveError::Closed)?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn resize_terminal(&self, columns: u16, rows: u16) -> Result<(), SlaveError> {
        let master = self
            .master
            .lock()
            .map_err(|_| SlaveError::Resize("pty lock poisoned".to_string()))?;
        master
            .resize(PtySize {
                rows,
                cols: columns,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SlaveError::Resize(e.to_string()))
    }

    fn window_title(&self) -> Result<String, SlaveError> {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let command = self.command.to_string_lossy();

        Ok(self.settings.title.render(&TitleVars {
            command: &command,
            pid: self.pid.unwrap_or_default(),
            hostname: &hostname,
        }))
    }

    /// Send the close signal, then SIGKILL after every `close_timeout` that
    /// passes without the pty closing. Never gives up.
    async fn close(&self) -> Result<(), SlaveError> {
        self.signal(self.settings.close_signal);

        loop {
            let wait = wait_closed(self.closed.clone());
            if tokio::time::timeout(self.settings.close_timeout, wait)
                .await
                .is_ok()
            {
                return Ok(());
            }
            warn!(
                "`{}` (pid {:?}) still running {:?} after {}, sending SIGKILL",
                self.command.display(),
                self.pid,
                self.settings.close_timeout,
                self.settings.close_signal,
            );
            self.signal(CloseSignal::KILL);
        }
    }
}

impl Drop for LocalCommand {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("Dropping running command, killing pid {:?}", self.pid);
            self.signal(CloseSignal::KILL);
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Read the pty on a dedicated thread and forward output to `chunks`. Stops
/// at end of stream, on a read error, or once nobody receives.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    chunks: mpsc::Sender<Vec<u8>>,
    pid: Option<u32>,
) -> Result<(), SlaveError> {
    std::thread::Builder::new()
        .name(format!("pty-read-{}", pid.unwrap_or_default()))
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    // Linux reports a hung-up pty master as EIO.
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("pty read for pid {pid:?} failed: {e}");
                        break;
                    }
                };
                if chunks.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            trace!("pty reader for pid {pid:?} finished");
        })
        .map(|_| ())
        .map_err(|e| SlaveError::Spawn(format!("failed to start pty reader: {e}")))
}

/// Wait for the command to exit on a dedicated thread, then close the pty
/// writer and publish the closed marker.
fn spawn_watcher(
    mut child: Box<dyn Child + Send + Sync>,
    writer: SharedWriter,
    closed: watch::Sender<bool>,
    pid: Option<u32>,
) -> Result<(), SlaveError> {
    std::thread::Builder::new()
        .name(format!("pty-wait-{}", pid.unwrap_or_default()))
        .spawn(move || {
            match child.wait() {
                Ok(status) => debug!("pid {pid:?} exited with code {}", status.exit_code()),
                Err(e) => warn!("Failed to wait for pid {pid:?}: {e}"),
            }
            if let Ok(mut writer) = writer.lock() {
                writer.take();
            }
            closed.send_replace(true);
        })
        .map(|_| ())
        .map_err(|e| SlaveError::Spawn(format!("failed to start lifecycle watcher: {e}")))
}

fn join_error(err: tokio::task::JoinError) -> SlaveError {
    SlaveError::Io(io::Error::new(io::ErrorKind::Other, err))
}

/// Resolve `program` like a shell would: names containing a slash are used
/// as-is, anything else is looked up in `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
