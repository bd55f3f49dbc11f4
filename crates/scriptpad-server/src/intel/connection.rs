// crates/scriptpad-server/src/intel/connection.rs
// JSON-lines channel to one intelligence-server process: request/response
// correlation, timeouts, and liveness

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};
use crate::process::{self, ProcessHandle, ProcessSpec};
use scriptpad_types::{IntelRequest, IntelResponse, Script};

/// Default ceiling on a single request round-trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<IntelResponse>>>>;

/// One live connection to an intelligence server. Implementations must be
/// safe to share across tasks.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<IntelResponse>;
    /// False once the server has closed its side of the channel
    fn is_alive(&self) -> bool;
    async fn shutdown(&self);
}

/// Starts one server process per script session
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, script: &Script) -> Result<Box<dyn ServerTransport>>;
}

/// Process-backed transport speaking newline-delimited JSON over stdio
pub struct ServerChannel {
    writer: tokio::sync::Mutex<ChildStdin>,
    handle: tokio::sync::Mutex<ProcessHandle>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
    request_timeout: Duration,
}

impl ServerChannel {
    pub fn new(mut handle: ProcessHandle, request_timeout: Duration) -> Result<Self> {
        let stdin = handle.take_stdin().ok_or_else(|| {
            ScriptpadError::Intel("server process has no stdin pipe".to_string())
        })?;
        let stdout = handle.take_stdout().ok_or_else(|| {
            ScriptpadError::Intel("server process has no stdout pipe".to_string())
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IntelResponse>(&line) {
                    Ok(response) => {
                        let sender = reader_pending.lock().ok().and_then(|mut p| {
                            p.remove(&response.id)
                        });
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                debug!(id = response.id, "Response with no pending request")
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Unparseable line from intelligence server"),
                }
            }
            // EOF: the server is gone; dropping pending senders fails all
            // in-flight requests
            reader_alive.store(false, Ordering::SeqCst);
            if let Ok(mut p) = reader_pending.lock() {
                p.clear();
            }
            debug!("Intelligence server channel closed");
        });

        let stderr_task = handle.take_stderr().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server_stderr = %line, "Intelligence server");
                }
            })
        });

        Ok(Self {
            writer: tokio::sync::Mutex::new(stdin),
            handle: tokio::sync::Mutex::new(handle),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader_task,
            stderr_task,
            request_timeout,
        })
    }
}

#[async_trait]
impl ServerTransport for ServerChannel {
    async fn request(&self, method: &str, params: Value) -> Result<IntelResponse> {
        if !self.is_alive() {
            return Err(ScriptpadError::Intel(
                "intelligence server is not running".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = IntelRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        if let Ok(mut p) = self.pending.lock() {
            p.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                if let Ok(mut p) = self.pending.lock() {
                    p.remove(&id);
                }
                self.alive.store(false, Ordering::SeqCst);
                return Err(ScriptpadError::Intel(format!(
                    "failed to write to intelligence server: {e}"
                )));
            }
            let _ = writer.flush().await;
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ScriptpadError::Intel(
                "intelligence server closed the connection".to_string(),
            )),
            Err(_) => {
                if let Ok(mut p) = self.pending.lock() {
                    p.remove(&id);
                }
                Err(ScriptpadError::Intel(format!(
                    "request '{method}' timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.handle.lock().await.stop().await;
        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

/// Launches the configured intelligence-server binary, one process per script
pub struct ProcessServerLauncher {
    program: PathBuf,
    args: Vec<String>,
    request_timeout: Duration,
}

impl ProcessServerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, request_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            request_timeout,
        }
    }
}

#[async_trait]
impl ServerLauncher for ProcessServerLauncher {
    async fn launch(&self, script: &Script) -> Result<Box<dyn ServerTransport>> {
        let spec = ProcessSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .env("SCRIPTPAD_SCRIPT_ID", script.id.to_string())
            .with_redirect_io();
        let handle = process::start(&spec)?;
        debug!(
            script_id = %script.id,
            program = %self.program.display(),
            pid = handle.id(),
            "Launched intelligence server"
        );
        let channel = ServerChannel::new(handle, self.request_timeout)?;
        Ok(Box::new(channel))
    }
}

/// Virtual buffer name a script's session uses on the server
pub fn session_file_name(script_id: Uuid) -> String {
    format!("{script_id}.cs")
}
