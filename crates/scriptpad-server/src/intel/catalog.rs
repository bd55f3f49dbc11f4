// crates/scriptpad-server/src/intel/catalog.rs
// Per-script session registry: launch on first use, relaunch on crash,
// serialize per-session traffic

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::assemble::{self, AssembleOptions};
use crate::error::{Result, ScriptpadError};
use crate::events::Events;
use crate::scripts::ScriptStore;
use scriptpad_types::{
    intel_methods, AppEvent, IntelResponse, Script, SessionStatus, UpdateBufferParams,
};

use super::connection::{session_file_name, ServerLauncher, ServerTransport};

/// What one live session knows
struct SessionState {
    transport: Option<Box<dyn ServerTransport>>,
    /// Synthetic lines preceding user code in the server's buffer
    prefix_line_count: u32,
    file_name: String,
}

/// Exclusive access to one script's session. Holding a lease serializes all
/// operations against that session; concurrent callers queue on the same
/// entry instead of racing to start duplicate servers.
pub struct SessionLease {
    script_id: Uuid,
    state: OwnedMutexGuard<SessionState>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("script_id", &self.script_id)
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    pub fn script_id(&self) -> Uuid {
        self.script_id
    }

    pub fn prefix_line_count(&self) -> u32 {
        self.state.prefix_line_count
    }

    pub fn file_name(&self) -> &str {
        &self.state.file_name
    }

    /// Forward one request to the session's server
    pub async fn request(&mut self, method: &str, params: Value) -> Result<IntelResponse> {
        let transport = self
            .state
            .transport
            .as_ref()
            .ok_or_else(|| ScriptpadError::Intel("session has no live server".to_string()))?;
        transport.request(method, params).await
    }
}

/// Registry of intelligence-server sessions, keyed by script id. One server
/// process per open script; sessions are created lazily and torn down on
/// close or engine shutdown.
pub struct ServerCatalog {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionState>>>>,
    launcher: Arc<dyn ServerLauncher>,
    store: Arc<dyn ScriptStore>,
    events: Events,
}

impl ServerCatalog {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        store: Arc<dyn ScriptStore>,
        events: Events,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            launcher,
            store,
            events,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, script_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&script_id)
    }

    /// Acquire the session for a script, starting (or restarting) its server
    /// as needed. With `create` false, a script with no session yields
    /// `Ok(None)` instead of starting one.
    pub async fn lease(&self, script_id: Uuid, create: bool) -> Result<Option<SessionLease>> {
        loop {
            let entry = {
                let sessions = self.sessions.read().await;
                sessions.get(&script_id).cloned()
            };

            let entry = match entry {
                Some(entry) => entry,
                None if !create => return Ok(None),
                None => {
                    let mut sessions = self.sessions.write().await;
                    sessions
                        .entry(script_id)
                        .or_insert_with(|| {
                            Arc::new(Mutex::new(SessionState {
                                transport: None,
                                prefix_line_count: 0,
                                file_name: session_file_name(script_id),
                            }))
                        })
                        .clone()
                }
            };

            let mut state = entry.clone().lock_owned().await;

            // A concurrent close may have removed this entry between the map
            // lookup and the lock; launching into it would orphan the server
            // process. Retry against the map instead.
            let still_registered = {
                let sessions = self.sessions.read().await;
                sessions
                    .get(&script_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
            };
            if !still_registered {
                drop(state);
                if !create {
                    return Ok(None);
                }
                continue;
            }

            let needs_launch = match &state.transport {
                None => true,
                Some(transport) if !transport.is_alive() => {
                    warn!(script_id = %script_id, "Intelligence server died, relaunching");
                    self.emit_status(script_id, SessionStatus::Degraded);
                    true
                }
                Some(_) => false,
            };

            if needs_launch {
                if !create {
                    // Caller does not want to pay for a (re)start
                    return Ok(None);
                }
                self.start_session(script_id, &mut state).await?;
            }

            return Ok(Some(SessionLease { script_id, state }));
        }
    }

    async fn start_session(&self, script_id: Uuid, state: &mut SessionState) -> Result<()> {
        self.emit_status(script_id, SessionStatus::Starting);

        let script = self.store.get(script_id).await?;
        let transport = match self.launcher.launch(&script).await {
            Ok(t) => t,
            Err(e) => {
                self.emit_status(script_id, SessionStatus::Stopped);
                return Err(e);
            }
        };

        let assembled = assemble::assemble(&script, &AssembleOptions::default());
        state.prefix_line_count = assembled.prefix_line_count;

        let params = serde_json::to_value(UpdateBufferParams {
            file_name: state.file_name.clone(),
            buffer: assembled.text,
        })?;
        transport
            .request(intel_methods::UPDATE_BUFFER, params)
            .await?;

        state.transport = Some(transport);
        self.emit_status(script_id, SessionStatus::Ready);
        info!(script_id = %script_id, "Intelligence session ready");
        Ok(())
    }

    /// Push fresh script code into an existing session. Scripts without a
    /// session are left alone; their next session start reads current code.
    pub async fn update_code(&self, script: &Script) -> Result<()> {
        let Some(mut lease) = self.lease(script.id, false).await? else {
            return Ok(());
        };

        let assembled = assemble::assemble(script, &AssembleOptions::default());
        lease.state.prefix_line_count = assembled.prefix_line_count;

        let params = serde_json::to_value(UpdateBufferParams {
            file_name: lease.state.file_name.clone(),
            buffer: assembled.text,
        })?;
        lease.request(intel_methods::UPDATE_BUFFER, params).await?;
        Ok(())
    }

    /// Tear down one script's session
    pub async fn close(&self, script_id: Uuid) {
        let entry = self.sessions.write().await.remove(&script_id);
        if let Some(entry) = entry {
            let mut state = entry.lock().await;
            if let Some(transport) = state.transport.take() {
                transport.shutdown().await;
            }
            self.emit_status(script_id, SessionStatus::Stopped);
            info!(script_id = %script_id, "Closed intelligence session");
        }
    }

    /// Tear down every session (engine shutdown)
    pub async fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for id in ids {
            self.close(id).await;
        }
    }

    fn emit_status(&self, script_id: Uuid, status: SessionStatus) {
        self.events
            .emit(AppEvent::SessionStatusChanged { script_id, status });
    }
}
