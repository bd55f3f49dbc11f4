// crates/scriptpad-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::intel::DEFAULT_REQUEST_TIMEOUT;

/// Intelligence-server settings from environment variables
#[derive(Debug, Clone)]
pub struct IntelConfig {
    /// Server binary (SCRIPTPAD_INTEL_SERVER)
    pub program: Option<PathBuf>,
    /// Extra arguments, whitespace-separated (SCRIPTPAD_INTEL_SERVER_ARGS)
    pub args: Vec<String>,
    /// Per-request timeout (SCRIPTPAD_INTEL_TIMEOUT_SECS)
    pub request_timeout: Duration,
    /// Hard off switch (SCRIPTPAD_DISABLE_INTEL)
    pub disabled: bool,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            disabled: false,
        }
    }
}

impl IntelConfig {
    pub fn from_env() -> Self {
        if parse_bool_env("SCRIPTPAD_DISABLE_INTEL").unwrap_or(false) {
            info!("SCRIPTPAD_DISABLE_INTEL is set, code intelligence disabled");
            return Self {
                disabled: true,
                ..Self::default()
            };
        }

        let program = read_var("SCRIPTPAD_INTEL_SERVER").map(PathBuf::from);
        let args = read_var("SCRIPTPAD_INTEL_SERVER_ARGS")
            .map(|raw| raw.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        let request_timeout = read_var("SCRIPTPAD_INTEL_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        if program.is_none() {
            warn!("SCRIPTPAD_INTEL_SERVER not set - code intelligence will be unavailable");
        }

        Self {
            program,
            args,
            request_timeout,
            disabled: false,
        }
    }

    pub fn available(&self) -> bool {
        !self.disabled && self.program.is_some()
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Path to the dotnet executable (SCRIPTPAD_DOTNET)
    pub dotnet: PathBuf,
    /// Root for scripts, build output, and caches (SCRIPTPAD_DATA_DIR)
    pub data_dir: PathBuf,
    /// Intelligence-server settings
    pub intel: IntelConfig,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");

        let dotnet = read_var("SCRIPTPAD_DOTNET")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("dotnet"));

        let data_dir = read_var("SCRIPTPAD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        debug!(
            dotnet = %dotnet.display(),
            data_dir = %data_dir.display(),
            "Environment configuration loaded"
        );

        Self {
            dotnet,
            data_dir,
            intel: IntelConfig::from_env(),
        }
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.data_dir.join("scripts")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("scratch")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scriptpad")
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
