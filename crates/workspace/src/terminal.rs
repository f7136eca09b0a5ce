//! A child process run on behalf of the assistant.
//!
//! Output from stdout and stderr is appended to one buffer in arrival order
//! and streamed as [`TerminalEvent::Output`]. `Closed` is sent once, after
//! both output readers have drained, so no output ever follows it.

use crate::process::terminate_process_tree;
use aide_core::{AppError, AppResult};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;

const READ_CHUNK: usize = 8 * 1024;

/// How long readers may keep draining after the process exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Caller-chosen id, e.g. the tool call id
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// A chunk of stdout or stderr
    Output(String),
    /// The process exited (or never started); `None` when no code is known
    Closed { exit_code: Option<i32> },
    /// The terminal stopped being a pending action; the process keeps running
    Detached,
}

#[derive(Debug, Default)]
struct State {
    buffer: String,
    has_error: bool,
    detached: bool,
    disposed: bool,
    closed: bool,
    exit_code: Option<i32>,
}

struct Shared {
    id: String,
    command_line: String,
    state: Mutex<State>,
    events: UnboundedSender<TerminalEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, chunk: String, from_stderr: bool) {
        {
            let mut state = self.lock();
            state.buffer.push_str(&chunk);
            state.has_error = from_stderr;
        }
        let _ = self.events.send(TerminalEvent::Output(chunk));
    }

    fn close(&self, exit_code: Option<i32>) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.exit_code = exit_code;
        }
        tracing::debug!("Terminal {} closed with {:?}", self.id, exit_code);
        let _ = self.events.send(TerminalEvent::Closed { exit_code });
    }
}

pub struct Terminal {
    shared: Arc<Shared>,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl Terminal {
    /// Spawn the command in its own process group.
    ///
    /// A spawn failure is not returned: it is reported through the buffer
    /// and events like any other failed command. Must be called inside a
    /// tokio runtime.
    pub fn spawn(options: TerminalOptions, events: UnboundedSender<TerminalEvent>) -> Self {
        let command_line = std::iter::once(options.command.as_str())
            .chain(options.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let shared = Arc::new(Shared {
            id: options.id.clone(),
            command_line,
            state: Mutex::new(State::default()),
            events,
        });

        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .current_dir(&options.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Terminal {} failed to start: {}", options.id, e);
                let message = format!("Failed to start `{}`: {}\n", shared.command_line, e);
                shared.append(message, true);
                shared.close(None);
                return Self {
                    shared,
                    pid: None,
                    stdin: tokio::sync::Mutex::new(None),
                };
            }
        };

        let pid = child.id();
        tracing::info!(
            "Terminal {} started `{}` (pid {:?})",
            options.id,
            shared.command_line,
            pid
        );

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_output(stdout, shared.clone(), false)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_output(stderr, shared.clone(), true)));
        }
        let stdin = child.stdin.take();

        let waiter = shared.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!("Failed to wait for terminal {}: {}", waiter.id, e);
                    None
                }
            };

            for mut reader in readers {
                if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                    // A grandchild still holds the pipe open.
                    reader.abort();
                }
            }
            waiter.close(exit_code);
        });

        Self {
            shared,
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Command and arguments as one line.
    pub fn command_line(&self) -> &str {
        &self.shared.command_line
    }

    /// `None` when the process never started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// All output so far.
    pub fn output(&self) -> String {
        self.shared.lock().buffer.clone()
    }

    /// Whether the latest chunk came from stderr.
    pub fn has_error(&self) -> bool {
        self.shared.lock().has_error
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.shared.lock().exit_code
    }

    /// Write `text` to the process's stdin.
    pub async fn send_input(&self, text: &str) -> AppResult<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or_else(|| {
            AppError::Terminal(format!("Terminal {} has no open input", self.shared.id))
        })?;
        pipe.write_all(text.as_bytes())
            .await
            .map_err(|e| AppError::Terminal(format!("Failed to write to terminal: {}", e)))?;
        pipe.flush()
            .await
            .map_err(|e| AppError::Terminal(format!("Failed to write to terminal: {}", e)))?;
        Ok(())
    }

    /// Stop treating the terminal as pending. Returns `false` if it already was.
    pub fn detach(&self) -> bool {
        {
            let mut state = self.shared.lock();
            if state.detached {
                return false;
            }
            state.detached = true;
        }
        tracing::debug!("Terminal {} detached", self.shared.id);
        let _ = self.shared.events.send(TerminalEvent::Detached);
        true
    }

    /// Close stdin and terminate the process tree. Idempotent.
    pub fn dispose(&self) {
        let closed = {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.closed
        };

        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }

        let Some(pid) = self.pid else { return };
        if closed {
            return;
        }
        tracing::info!("Terminating terminal {} (pid {})", self.shared.id, pid);
        if let Err(e) = terminate_process_tree(pid) {
            tracing::warn!("Failed to terminate terminal {}: {}", self.shared.id, e);
        }
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("id", &self.shared.id)
            .field("command", &self.shared.command_line)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Exit code, with death by signal `n` reported as `128 + n`.
fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}

async fn read_output<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>, from_stderr: bool) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = take_utf8(&mut pending);
                if !text.is_empty() {
                    shared.append(text, from_stderr);
                }
            }
            Err(e) => {
                tracing::debug!("Terminal {} read error: {}", shared.id, e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        shared.append(String::from_utf8_lossy(&pending).into_owned(), from_stderr);
    }
}

/// Decode `pending`, keeping back an incomplete trailing UTF-8 sequence.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let keep = match std::str::from_utf8(pending) {
        Ok(_) => 0,
        Err(e) if e.error_len().is_none() => pending.len() - e.valid_up_to(),
        Err(_) => 0,
    };
    let complete: Vec<u8> = pending.drain(..pending.len() - keep).collect();
    String::from_utf8_lossy(&complete).into_owned()
}
