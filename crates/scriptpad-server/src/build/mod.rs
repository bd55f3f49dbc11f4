// crates/scriptpad-server/src/build/mod.rs
// Build pipeline - assembles scripts into on-disk projects and drives the
// dotnet toolchain for build, publish, and run

mod project;

pub use project::DotNetProject;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assemble::{self, AssembleOptions, AssembledProgram};
use crate::error::{Result, ScriptpadError};
use crate::events::Events;
use crate::process::{self, ProcessSpec};
use crate::resources::ResourcesCache;
use scriptpad_types::{AppEvent, OptimizationLevel, PublishOptions, Reference, Script};

/// Per-invocation build knobs
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub optimization: OptimizationLevel,
}

/// A successful build: where the binary landed and what was compiled
#[derive(Debug)]
pub struct BuildResult {
    pub binary_path: PathBuf,
    pub project_dir: PathBuf,
    pub assembled: AssembledProgram,
}

/// A successful publish
#[derive(Debug)]
pub struct PublishResult {
    pub output_dir: PathBuf,
}

/// Drives the whole script-to-artifact path: validate, assemble, materialize
/// a project, invoke the toolchain. One pipeline is shared across scripts;
/// each script gets its own project directory under the work dir.
pub struct BuildPipeline {
    dotnet: PathBuf,
    work_dir: PathBuf,
    resources: Arc<ResourcesCache>,
    events: Events,
}

impl BuildPipeline {
    pub fn new(
        dotnet: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        resources: Arc<ResourcesCache>,
        events: Events,
    ) -> Self {
        Self {
            dotnet: dotnet.into(),
            work_dir: work_dir.into(),
            resources,
            events,
        }
    }

    /// Validate, assemble, and materialize the script's project directory.
    /// Shared by build and publish so both see identical inputs.
    pub async fn prepare(&self, script: &Script) -> Result<(DotNetProject, AssembledProgram)> {
        for reference in &script.config.references {
            reference
                .ensure_valid()
                .map_err(ScriptpadError::InvalidOptions)?;
        }

        let framework = script.config.target_framework_version;
        let mut references = script.config.references.clone();
        let mut generated_sources: Vec<String> = Vec::new();

        if let Some(connection) = &script.config.data_connection {
            let resources = self.resources.get(connection, framework).await?;
            generated_sources.extend(resources.source_code.iter().cloned());
            references.extend(resources.required_references.iter().cloned());
            if let Some(image) = &resources.assembly_image {
                references.push(Reference::AssemblyImage {
                    assembly_name: format!("{}.Data", sanitize_assembly_name(&connection.name)),
                    image: image.clone(),
                });
            }
        }

        let assembled = assemble::assemble(script, &AssembleOptions::default());

        let project = DotNetProject::new(
            self.work_dir.join(script.id.to_string()),
            sanitize_assembly_name(&script.name),
            framework,
        );
        project.create(&references).await?;
        project.write_program(&assembled.text).await?;
        for (i, source) in generated_sources.iter().enumerate() {
            project
                .add_source(&format!("DataConnection{i}.cs"), source)
                .await?;
        }

        Ok((project, assembled))
    }

    /// Compile the script. Diagnostics from a failed compile come back verbatim
    /// in the error.
    pub async fn build(
        &self,
        script: &Script,
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<BuildResult> {
        let (project, assembled) = self.prepare(script).await?;
        let configuration = options.optimization.configuration();

        info!(
            script_id = %script.id,
            script = %script.name,
            configuration,
            "Building script"
        );

        let spec = ProcessSpec::new(&self.dotnet)
            .args(["build", "-c", configuration])
            .current_dir(project.root())
            .with_redirect_io();

        let result = process::run(&spec, cancel).await?;
        if result.has_error() {
            return Err(ScriptpadError::BuildFailed {
                diagnostics: combine_diagnostics(&result.stderr, &result.stdout),
            });
        }

        let binary_path = project.output_binary_path(configuration);
        debug!(script_id = %script.id, binary = %binary_path.display(), "Build succeeded");

        Ok(BuildResult {
            binary_path,
            project_dir: project.root().to_path_buf(),
            assembled,
        })
    }

    /// Publish the script as a standalone artifact into the requested
    /// directory.
    pub async fn publish(
        &self,
        script: &Script,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<PublishResult> {
        if options.assembly_name.trim().is_empty() {
            return Err(ScriptpadError::InvalidOptions(
                "assembly name is required".into(),
            ));
        }
        if options.directory_path.trim().is_empty() {
            return Err(ScriptpadError::InvalidOptions(
                "output directory is required".into(),
            ));
        }

        let mut options = options.clone();
        options.normalize();

        let output_dir = PathBuf::from(&options.directory_path);
        if options.delete_existing_files {
            clear_output_dir(&output_dir).await?;
        }

        let (project, _) = self.prepare(script).await?;
        let configuration = options.optimization.configuration();

        info!(
            script_id = %script.id,
            output = %output_dir.display(),
            configuration,
            "Publishing script"
        );

        let mut spec = ProcessSpec::new(&self.dotnet)
            .args(["publish", "-c", configuration])
            .arg("-o")
            .arg(output_dir.display().to_string())
            .arg(format!(
                "-p:AssemblyName={}",
                sanitize_assembly_name(&options.assembly_name)
            ))
            .current_dir(project.root())
            .with_redirect_io();

        if let Some(rid) = options.runtime_id() {
            spec = spec.args(["--runtime", rid]).arg(format!(
                "--self-contained={}",
                options.self_contained()
            ));
            if options.ready_to_run() {
                spec = spec.arg("-p:PublishReadyToRun=true");
            }
            if options.single_file() {
                spec = spec.arg("-p:PublishSingleFile=true");
            }
            if options.trimmed() {
                spec = spec.arg("-p:PublishTrimmed=true");
            }
            if options.embed_native_libraries() {
                spec = spec.arg("-p:IncludeNativeLibrariesForSelfExtract=true");
            }
            if options.embed_pdbs() {
                spec = spec.arg("-p:DebugType=embedded");
            }
        }

        let result = process::run(&spec, cancel).await?;
        if result.has_error() {
            return Err(ScriptpadError::BuildFailed {
                diagnostics: combine_diagnostics(&result.stderr, &result.stdout),
            });
        }

        info!(script_id = %script.id, output = %output_dir.display(), "Publish succeeded");
        Ok(PublishResult { output_dir })
    }

    /// Build and execute the script, streaming its output as events. Returns
    /// the script's exit code.
    pub async fn run(
        &self,
        script: &Script,
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let build = self.build(script, options, cancel).await?;

        info!(script_id = %script.id, "Running script");
        let spec = ProcessSpec::new(&self.dotnet)
            .arg(build.binary_path.display().to_string())
            .current_dir(&build.project_dir)
            .with_redirect_io();

        let mut handle = process::start(&spec)?;
        let script_id = script.id;

        let stdout_task = handle
            .take_stdout()
            .map(|out| spawn_output_forwarder(out, script_id, self.events.clone()));
        let stderr_task = handle
            .take_stderr()
            .map(|err| spawn_output_forwarder(err, script_id, self.events.clone()));

        let exit_code = tokio::select! {
            code = handle.wait() => code?,
            _ = cancel.cancelled() => {
                warn!(script_id = %script.id, "Run cancelled, stopping script");
                handle.stop().await;
                return Err(ScriptpadError::Cancelled);
            }
        };

        // Let the forwarders drain before reporting completion
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        info!(script_id = %script.id, exit_code, "Script finished");
        Ok(exit_code)
    }
}

fn spawn_output_forwarder<R>(
    reader: R,
    script_id: uuid::Uuid,
    events: Events,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            events.emit(AppEvent::ScriptOutputEmitted {
                script_id,
                output: line,
            });
        }
    })
}

fn combine_diagnostics(stderr: &str, stdout: &str) -> String {
    match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
        (false, false) => format!("{}\n{}", stderr.trim_end(), stdout.trim_end()),
        (false, true) => stderr.trim_end().to_string(),
        _ => stdout.trim_end().to_string(),
    }
}

/// Turn an arbitrary script name into a valid assembly name
pub fn sanitize_assembly_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "script".to_string()
    } else {
        cleaned
    }
}

/// Reject output paths where wiping existing files would be catastrophic:
/// the filesystem root, a home directory, or anything shallower than two
/// path components.
pub fn is_unsafe_output_path(path: &Path) -> bool {
    if path.parent().is_none() {
        return true;
    }
    if let Some(home) = dirs::home_dir() {
        if path == home {
            return true;
        }
    }
    let normal_components = path
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .count();
    normal_components < 2
}

async fn clear_output_dir(dir: &Path) -> Result<()> {
    if is_unsafe_output_path(dir) {
        return Err(ScriptpadError::UnsafeOutputPath(dir.to_path_buf()));
    }
    if !dir.exists() {
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    debug!(dir = %dir.display(), "Cleared output directory");
    Ok(())
}
