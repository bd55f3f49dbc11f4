// crates/scriptpad-server/src/error.rs
// Standardized error types for Scriptpad

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the Scriptpad library
#[derive(Error, Debug)]
pub enum ScriptpadError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("refusing to delete files in suspicious output path: {0}")]
    UnsafeOutputPath(PathBuf),

    #[error("build failed:\n{diagnostics}")]
    BuildFailed { diagnostics: String },

    #[error("resource generation failed for connection {connection_id}: {cause}")]
    ResourceGenerationFailed { connection_id: Uuid, cause: String },

    #[error("could not start process '{program}': {cause}")]
    SpawnFailed { program: String, cause: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("no intelligence-server session for script {0}")]
    SessionNotFound(Uuid),

    #[error("intelligence server error: {0}")]
    Intel(String),

    #[error("script not found: {0}")]
    ScriptNotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using ScriptpadError
pub type Result<T> = std::result::Result<T, ScriptpadError>;

impl From<String> for ScriptpadError {
    fn from(s: String) -> Self {
        ScriptpadError::Other(s)
    }
}

impl From<tokio::task::JoinError> for ScriptpadError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ScriptpadError::Cancelled
        } else {
            ScriptpadError::Other(err.to_string())
        }
    }
}
