// crates/scriptpad-server/src/config/file.rs
// File-based configuration from ~/.scriptpad/config.toml

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use scriptpad_types::{DotNetFrameworkVersion, ScriptKind};

/// Top-level config structure
#[derive(Debug, Deserialize, Default)]
pub struct ScriptpadConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Defaults applied to newly created scripts
#[derive(Debug, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Script kind for new scripts ("program", "expression", "statements")
    pub kind: Option<String>,
    /// Target framework for new scripts (e.g. "net8.0")
    pub target_framework: Option<String>,
    /// Extra namespaces every new script starts with
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl ScriptpadConfig {
    /// Load config from ~/.scriptpad/config.toml
    pub fn load() -> Self {
        let path = Self::config_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path
    fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scriptpad")
            .join("config.toml")
    }

    pub fn default_kind(&self) -> ScriptKind {
        self.defaults
            .kind
            .as_deref()
            .and_then(ScriptKind::from_str)
            .unwrap_or_default()
    }

    pub fn default_framework(&self) -> DotNetFrameworkVersion {
        self.defaults
            .target_framework
            .as_deref()
            .and_then(DotNetFrameworkVersion::from_str)
            .unwrap_or_default()
    }
}
