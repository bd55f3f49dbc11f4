// crates/scriptpad-server/src/scripts.rs
// Script persistence - scripts live as <name>.csx files with a JSON sidecar
// carrying identity and configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};
use scriptpad_types::{Script, ScriptConfig};

pub const SCRIPT_EXTENSION: &str = "csx";

/// Storage seam for scripts. The engine never touches the filesystem for
/// script content directly.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Script>;
    async fn list(&self) -> Result<Vec<Script>>;
    async fn save(&self, script: &Script) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Sidecar contents: everything about a script that is not its code
#[derive(Debug, Serialize, Deserialize)]
struct ScriptSidecar {
    id: Uuid,
    #[serde(default)]
    config: ScriptConfig,
}

/// Directory-backed store. `<name>.csx` holds the code, `<name>.csx.json`
/// holds id and configuration. Files without a sidecar are ignored until
/// saved through the store.
pub struct FileScriptStore {
    dir: PathBuf,
}

impl FileScriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn script_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{SCRIPT_EXTENSION}"))
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{SCRIPT_EXTENSION}.json"))
    }

    async fn read_script(&self, script_path: &Path) -> Result<Option<Script>> {
        let Some(stem) = script_path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let sidecar_path = self.sidecar_path(stem);
        let sidecar_raw = match tokio::fs::read_to_string(&sidecar_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(script = stem, "Skipping script without sidecar");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: ScriptSidecar = match serde_json::from_str(&sidecar_raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(script = stem, error = %e, "Malformed script sidecar, skipping");
                return Ok(None);
            }
        };
        let code = tokio::fs::read_to_string(script_path).await?;

        Ok(Some(Script {
            id: sidecar.id,
            name: stem.to_string(),
            code,
            config: sidecar.config,
        }))
    }
}

#[async_trait]
impl ScriptStore for FileScriptStore {
    async fn get(&self, id: Uuid) -> Result<Script> {
        self.list()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(ScriptpadError::ScriptNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Script>> {
        let mut scripts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scripts),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION) {
                if let Some(script) = self.read_script(&path).await? {
                    scripts.push(script);
                }
            }
        }
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    async fn save(&self, script: &Script) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let sidecar = ScriptSidecar {
            id: script.id,
            config: script.config.clone(),
        };
        tokio::fs::write(self.script_path(&script.name), &script.code).await?;
        tokio::fs::write(
            self.sidecar_path(&script.name),
            serde_json::to_string_pretty(&sidecar)?,
        )
        .await?;
        debug!(script_id = %script.id, script = %script.name, "Saved script");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let script = self.get(id).await?;
        tokio::fs::remove_file(self.script_path(&script.name)).await?;
        // Sidecar may already be gone; that is fine
        if let Err(e) = tokio::fs::remove_file(self.sidecar_path(&script.name)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        debug!(script_id = %id, "Deleted script");
        Ok(())
    }
}

/// Map-backed store for tests and ephemeral sessions
#[derive(Default)]
pub struct InMemoryScriptStore {
    scripts: RwLock<HashMap<Uuid, Script>>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn get(&self, id: Uuid) -> Result<Script> {
        self.scripts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ScriptpadError::ScriptNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Script>> {
        let mut scripts: Vec<Script> = self.scripts.read().await.values().cloned().collect();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    async fn save(&self, script: &Script) -> Result<()> {
        self.scripts.write().await.insert(script.id, script.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.scripts
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(ScriptpadError::ScriptNotFound(id))
    }
}
