// crates/scriptpad-server/src/process.rs
// Process runner - spawn and supervise external processes with optional
// stdio redirection and cancellation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, ScriptpadError};

/// How long `stop` waits after SIGTERM before force-killing
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to launch one external process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub redirect_io: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            redirect_io: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Capture stdout/stderr instead of inheriting the parent's
    pub fn with_redirect_io(mut self) -> Self {
        self.redirect_io = true;
        self
    }

    fn build_command(&self, pipe_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if self.redirect_io {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        if pipe_stdin {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn program_display(&self) -> String {
        self.program.display().to_string()
    }
}

/// Exit code plus captured output of a completed process
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn has_error(&self) -> bool {
        self.exit_code != 0
    }

    /// Error with whichever stream has content, stderr preferred
    pub fn ensure_successful(&self) -> Result<()> {
        if !self.has_error() {
            return Ok(());
        }
        let message = if !self.stderr.trim().is_empty() {
            self.stderr.clone()
        } else {
            self.stdout.clone()
        };
        Err(ScriptpadError::Other(format!(
            "process exited with code {}: {}",
            self.exit_code, message
        )))
    }
}

/// Owns one long-lived OS process. Exactly one owner at a time; `stop` (or
/// drop) terminates the process and releases the stream handles.
pub struct ProcessHandle {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stopped: bool,
}

impl ProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Check whether the process is still alive
    pub fn is_running(&mut self) -> bool {
        !self.stopped && self.child.try_wait().map(|s| s.is_none()).unwrap_or(false)
    }

    /// Wait for natural exit
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Terminate the process: SIGTERM, bounded wait, then SIGKILL. Idempotent
    /// and safe on an already-exited process.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        // Drop our end of stdin so well-behaved servers can exit on EOF
        self.stdin.take();

        if let Some(pid) = self.child.id() {
            debug!(program = %self.program, pid, "Stopping process");
            // SIGTERM may race process exit; ESRCH is fine either way
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(program = %self.program, code = status.code(), "Process stopped");
            }
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "Failed waiting for process exit");
            }
            Err(_) => {
                warn!(program = %self.program, "Process ignored SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(program = %self.program, error = %e, "Failed to kill process");
                }
            }
        }

        self.stdout.take();
        self.stderr.take();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.stopped {
            // Best effort; kill_on_drop covers the descriptor either way
            let _ = self.child.start_kill();
        }
    }
}

/// Start a long-lived process without waiting for exit. The caller owns
/// termination via [`ProcessHandle::stop`].
pub fn start(spec: &ProcessSpec) -> Result<ProcessHandle> {
    let mut cmd = spec.build_command(true);
    let mut child = cmd.spawn().map_err(|e| ScriptpadError::SpawnFailed {
        program: spec.program_display(),
        cause: e.to_string(),
    })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    debug!(program = %spec.program.display(), pid = child.id(), "Started process");

    Ok(ProcessHandle {
        program: spec.program_display(),
        child,
        stdin,
        stdout,
        stderr,
        stopped: false,
    })
}

/// Run a process to completion, capturing output if the spec redirects IO.
///
/// Cancellation is observable while waiting: when the token fires the process
/// is killed and `Cancelled` is returned.
pub async fn run(spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ProcessResult> {
    let mut cmd = spec.build_command(false);
    let mut child = cmd.spawn().map_err(|e| ScriptpadError::SpawnFailed {
        program: spec.program_display(),
        cause: e.to_string(),
    })?;

    let stdout_task = child.stdout.take().map(read_to_string_task);
    let stderr_task = child.stderr.take().map(read_to_string_task);

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            warn!(program = %spec.program.display(), "Run cancelled, killing process");
            let _ = child.kill().await;
            return Err(ScriptpadError::Cancelled);
        }
    };

    let stdout = collect_output(stdout_task).await;
    let stderr = collect_output(stderr_task).await;

    Ok(ProcessResult {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_to_string_task<R>(mut reader: R) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        let _ = reader.read_to_string(&mut buf).await;
        buf
    })
}

async fn collect_output(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Guard that a working directory exists before launching into it
pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
