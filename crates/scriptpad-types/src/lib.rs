// crates/scriptpad-types/src/lib.rs
// Shared types for Scriptpad (engine + UI compatible)
// No engine-only dependencies allowed here

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

// ═══════════════════════════════════════
// SCRIPT TYPES
// ═══════════════════════════════════════

/// What shape the user's source text takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// A complete program with its own entry point
    Program,
    /// A single expression whose value is printed
    Expression,
    /// A sequence of top-level statements
    Statements,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Expression => "expression",
            Self::Statements => "statements",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "program" => Some(Self::Program),
            "expression" => Some(Self::Expression),
            "statements" => Some(Self::Statements),
            _ => None,
        }
    }
}

impl Default for ScriptKind {
    fn default() -> Self {
        Self::Statements
    }
}

/// Execution configuration attached to a script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub kind: ScriptKind,
    #[serde(default)]
    pub target_framework_version: DotNetFrameworkVersion,
    /// Namespaces imported into every assembled program
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Extra library references beyond the implicit SDK set
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Optional data connection contributing generated code + references
    #[serde(default)]
    pub data_connection: Option<DataConnection>,
}

impl ScriptConfig {
    /// Namespaces every wrapped program gets regardless of user config
    pub fn default_namespaces() -> &'static [&'static str] {
        &[
            "System",
            "System.Collections.Generic",
            "System.Linq",
            "System.Threading.Tasks",
        ]
    }
}

/// A unit of user-submitted source code plus its execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub config: ScriptConfig,
}

impl Script {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            code: code.into(),
            config: ScriptConfig::default(),
        }
    }

    /// Replace the source text (the only mutation scripts support)
    pub fn update_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }
}

// ═══════════════════════════════════════
// DOTNET TYPES
// ═══════════════════════════════════════

/// Target framework for assembly and builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotNetFrameworkVersion {
    Net6,
    Net7,
    Net8,
    Net9,
}

impl DotNetFrameworkVersion {
    /// All supported versions, in release order
    pub const ALL: &'static [DotNetFrameworkVersion] =
        &[Self::Net6, Self::Net7, Self::Net8, Self::Net9];

    /// Target framework moniker as the toolchain expects it
    pub fn tfm(&self) -> &'static str {
        match self {
            Self::Net6 => "net6.0",
            Self::Net7 => "net7.0",
            Self::Net8 => "net8.0",
            Self::Net9 => "net9.0",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().trim_start_matches("net").trim_end_matches(".0") {
            "6" => Some(Self::Net6),
            "7" => Some(Self::Net7),
            "8" => Some(Self::Net8),
            "9" => Some(Self::Net9),
            _ => None,
        }
    }
}

impl Default for DotNetFrameworkVersion {
    fn default() -> Self {
        Self::Net8
    }
}

impl fmt::Display for DotNetFrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tfm())
    }
}

/// Compiler optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Debug,
    Release,
}

impl OptimizationLevel {
    /// Build configuration name as passed to the toolchain
    pub fn configuration(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
        }
    }
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        Self::Debug
    }
}

/// A library reference contributed to a build.
///
/// Two references are equal iff they are the same variant with the same
/// identifying fields. An `AssemblyImage` is identified by its assembly name;
/// the image bytes are payload, not identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reference {
    /// A compiled library on disk
    Assembly { path: String },
    /// A package from the package registry
    Package { package_id: String, version: String },
    /// An in-memory compiled assembly (e.g. from data-connection scaffolding)
    AssemblyImage {
        assembly_name: String,
        #[serde(default)]
        image: Vec<u8>,
    },
}

impl Reference {
    pub fn assembly(path: impl Into<String>) -> Self {
        Self::Assembly { path: path.into() }
    }

    pub fn package(package_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Package {
            package_id: package_id.into(),
            version: version.into(),
        }
    }

    /// Validate identifying fields; references with blank identities are rejected
    /// at construction sites.
    pub fn ensure_valid(&self) -> Result<(), String> {
        match self {
            Self::Assembly { path } => {
                if path.trim().is_empty() {
                    return Err("assembly reference has an empty path".into());
                }
            }
            Self::Package {
                package_id,
                version,
            } => {
                if package_id.trim().is_empty() {
                    return Err("package reference has an empty package id".into());
                }
                if version.trim().is_empty() {
                    return Err(format!("package reference '{package_id}' has an empty version"));
                }
            }
            Self::AssemblyImage { assembly_name, .. } => {
                if assembly_name.trim().is_empty() {
                    return Err("assembly image reference has an empty assembly name".into());
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Assembly { path: a }, Self::Assembly { path: b }) => a == b,
            (
                Self::Package {
                    package_id: a,
                    version: av,
                },
                Self::Package {
                    package_id: b,
                    version: bv,
                },
            ) => a == b && av == bv,
            (
                Self::AssemblyImage {
                    assembly_name: a, ..
                },
                Self::AssemblyImage {
                    assembly_name: b, ..
                },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Assembly { path } => {
                0u8.hash(state);
                path.hash(state);
            }
            Self::Package {
                package_id,
                version,
            } => {
                1u8.hash(state);
                package_id.hash(state);
                version.hash(state);
            }
            Self::AssemblyImage { assembly_name, .. } => {
                2u8.hash(state);
                assembly_name.hash(state);
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assembly { path } => write!(f, "assembly: {path}"),
            Self::Package {
                package_id,
                version,
            } => write!(f, "package: {package_id} v{version}"),
            Self::AssemblyImage { assembly_name, .. } => {
                write!(f, "assembly image: {assembly_name}")
            }
        }
    }
}

/// Options for publishing a script as a standalone artifact.
///
/// The runtime-specific toggles are private: they are only meaningful when a
/// runtime id is set, and clearing the runtime id resets all of them. Use the
/// setters; deserialized options are normalized by the pipeline before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOptions {
    pub assembly_name: String,
    pub directory_path: String,
    #[serde(default)]
    pub optimization: OptimizationLevel,
    /// Clear the output directory before publishing. Destructive; the pipeline
    /// refuses suspicious paths.
    #[serde(default)]
    pub delete_existing_files: bool,
    #[serde(default)]
    runtime_id: Option<String>,
    #[serde(default)]
    self_contained: bool,
    #[serde(default)]
    ready_to_run: bool,
    #[serde(default)]
    single_file: bool,
    #[serde(default)]
    trimmed: bool,
    #[serde(default)]
    embed_native_libraries: bool,
    #[serde(default)]
    embed_pdbs: bool,
}

impl PublishOptions {
    pub fn new(assembly_name: impl Into<String>, directory_path: impl Into<String>) -> Self {
        Self {
            assembly_name: assembly_name.into(),
            directory_path: directory_path.into(),
            optimization: OptimizationLevel::Release,
            delete_existing_files: false,
            runtime_id: None,
            self_contained: false,
            ready_to_run: false,
            single_file: false,
            trimmed: false,
            embed_native_libraries: false,
            embed_pdbs: false,
        }
    }

    pub fn runtime_id(&self) -> Option<&str> {
        self.runtime_id.as_deref()
    }

    /// Set or clear the target runtime id. Clearing it resets every
    /// runtime-specific toggle to disabled.
    pub fn set_runtime_id(&mut self, runtime_id: Option<String>) {
        self.runtime_id = runtime_id.filter(|r| !r.trim().is_empty());
        if self.runtime_id.is_none() {
            self.self_contained = false;
            self.ready_to_run = false;
            self.single_file = false;
            self.trimmed = false;
            self.embed_native_libraries = false;
            self.embed_pdbs = false;
        }
    }

    pub fn self_contained(&self) -> bool {
        self.self_contained
    }

    pub fn set_self_contained(&mut self, on: bool) {
        self.self_contained = on && self.runtime_id.is_some();
    }

    pub fn ready_to_run(&self) -> bool {
        self.ready_to_run
    }

    pub fn set_ready_to_run(&mut self, on: bool) {
        self.ready_to_run = on && self.runtime_id.is_some();
    }

    pub fn single_file(&self) -> bool {
        self.single_file
    }

    pub fn set_single_file(&mut self, on: bool) {
        self.single_file = on && self.runtime_id.is_some();
    }

    pub fn trimmed(&self) -> bool {
        self.trimmed
    }

    pub fn set_trimmed(&mut self, on: bool) {
        self.trimmed = on && self.runtime_id.is_some();
    }

    pub fn embed_native_libraries(&self) -> bool {
        self.embed_native_libraries
    }

    pub fn set_embed_native_libraries(&mut self, on: bool) {
        self.embed_native_libraries = on && self.runtime_id.is_some();
    }

    pub fn embed_pdbs(&self) -> bool {
        self.embed_pdbs
    }

    pub fn set_embed_pdbs(&mut self, on: bool) {
        self.embed_pdbs = on && self.runtime_id.is_some();
    }

    /// Re-establish the runtime-id invariant after deserialization or manual
    /// construction. A portable publish never carries platform toggles.
    pub fn normalize(&mut self) {
        let rid = self.runtime_id.take();
        self.set_runtime_id(rid);
    }
}

// ═══════════════════════════════════════
// DATA CONNECTIONS
// ═══════════════════════════════════════

/// An external data-source configuration. Contributes generated code, an
/// optional compiled reference assembly, and extra references to builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConnection {
    pub id: Uuid,
    pub name: String,
    /// Database provider identifier (e.g. "postgresql", "mssql")
    pub provider: String,
    pub connection_string: String,
}

// ═══════════════════════════════════════
// INTELLIGENCE SERVER PROTOCOL
// ═══════════════════════════════════════

/// Method names the intelligence server understands
pub mod intel_methods {
    pub const CHECK_CODE: &str = "checkcode";
    pub const AUTOCOMPLETE: &str = "autocomplete";
    pub const QUICK_FIXES: &str = "quickfixes";
    pub const UPDATE_BUFFER: &str = "updatebuffer";
}

/// One request on the JSON-lines channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// One response on the JSON-lines channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCheckParams {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParams {
    pub file_name: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub word_to_complete: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickFixParams {
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBufferParams {
    pub file_name: String,
    pub buffer: String,
}

/// A diagnostic or quick-fix anchored to a source position. Lines and columns
/// are 1-based. After dispatch translation, positions refer to the user's
/// original source text; `in_user_code` is false for positions that fell inside
/// the synthetic prefix and were clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickFix {
    pub text: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_column: u32,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default = "default_true")]
    pub in_user_code: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickFixResponse {
    #[serde(default)]
    pub quick_fixes: Vec<QuickFix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub insert_text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub items: Vec<CompletionItem>,
    /// Line the completions anchor to, when the server reports one
    #[serde(default)]
    pub anchor_line: Option<u32>,
}

// ═══════════════════════════════════════
// SESSIONS & EVENTS
// ═══════════════════════════════════════

/// Lifecycle state of a per-script intelligence-server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Ready,
    /// Server process died; next request restarts it
    Degraded,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

/// Notifications the engine publishes for the UI layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    ScriptOutputEmitted { script_id: Uuid, output: String },
    ScriptDirectoryChanged { path: String },
    SessionStatusChanged { script_id: Uuid, status: SessionStatus },
}
