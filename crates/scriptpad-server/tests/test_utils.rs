//! Test utilities for Scriptpad integration tests

use async_trait::async_trait;
use scriptpad::error::Result;
use scriptpad::events::Events;
use scriptpad::intel::{ServerCatalog, ServerLauncher, ServerTransport};
use scriptpad::scripts::{InMemoryScriptStore, ScriptStore};
use scriptpad_types::{IntelResponse, Script};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Transport whose answers come from a canned method -> result table.
/// Remembers every method it was asked, in order.
pub struct CannedTransport {
    alive: Arc<AtomicBool>,
    results: Arc<Mutex<HashMap<String, Value>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServerTransport for CannedTransport {
    async fn request(&self, method: &str, _params: Value) -> Result<IntelResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(method.to_string());
        }
        let result = self
            .results
            .lock()
            .ok()
            .and_then(|r| r.get(method).cloned())
            .unwrap_or(json!({}));
        Ok(IntelResponse {
            id: 1,
            result: Some(result),
            error: None,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Launcher producing [`CannedTransport`]s. Counts launches and keeps a kill
/// switch for the most recent transport so tests can simulate server crashes.
pub struct CannedLauncher {
    launches: AtomicUsize,
    results: Arc<Mutex<HashMap<String, Value>>>,
    calls: Arc<Mutex<Vec<String>>>,
    current_alive: Mutex<Option<Arc<AtomicBool>>>,
    spawned: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Default for CannedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl CannedLauncher {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            results: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            current_alive: Mutex::new(None),
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn set_result(&self, method: &str, result: Value) {
        if let Ok(mut r) = self.results.lock() {
            r.insert(method.to_string(), result);
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Transports launched so far that were never shut down. A non-zero
    /// count after every session is closed means a server leaked.
    pub fn live_transports(&self) -> usize {
        self.spawned
            .lock()
            .map(|s| s.iter().filter(|alive| alive.load(Ordering::SeqCst)).count())
            .unwrap_or(0)
    }

    /// Simulate the current server process dying
    pub fn kill_current(&self) {
        if let Ok(guard) = self.current_alive.lock() {
            if let Some(alive) = guard.as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl ServerLauncher for CannedLauncher {
    async fn launch(&self, _script: &Script) -> Result<Box<dyn ServerTransport>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        if let Ok(mut guard) = self.current_alive.lock() {
            *guard = Some(alive.clone());
        }
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(alive.clone());
        }
        Ok(Box::new(CannedTransport {
            alive,
            results: self.results.clone(),
            calls: self.calls.clone(),
        }))
    }
}

/// Catalog over an in-memory store holding the given scripts
pub async fn catalog_with(
    launcher: Arc<CannedLauncher>,
    scripts: &[Script],
) -> Arc<ServerCatalog> {
    let store = Arc::new(InMemoryScriptStore::new());
    for script in scripts {
        store.save(script).await.unwrap();
    }
    Arc::new(ServerCatalog::new(launcher, store, Events::new()))
}

/// Write a fake `dotnet` that mimics the toolchain's output layout: builds
/// drop a binary under bin/, anything else executes the "script" by printing
/// its arguments' lines.
pub fn write_stub_dotnet(dir: &Path, assembly_name: &str) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
case "$1" in
  build|publish)
    mkdir -p bin/Debug/net8.0 bin/Release/net8.0
    touch "bin/Debug/net8.0/{assembly_name}.dll" "bin/Release/net8.0/{assembly_name}.dll"
    ;;
  *)
    echo "stub output"
    ;;
esac
"#
    );
    let path = dir.join("dotnet");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
