// crates/scriptpad-server/src/main.rs
// Scriptpad - run, build, publish, and analyze C# scripts

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use scriptpad::build::{BuildOptions, BuildPipeline};
use scriptpad::config::{EnvConfig, ScriptpadConfig};
use scriptpad::events::{spawn_watcher, Events};
use scriptpad::intel::{Dispatcher, ProcessServerLauncher, ServerCatalog};
use scriptpad::resources::{ResourcesCache, ToolchainResourceGenerator};
use scriptpad::scripts::{FileScriptStore, ScriptStore};
use scriptpad_types::{AppEvent, OptimizationLevel, PublishOptions, Script};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "scriptpad")]
#[command(about = "Run, build, publish, and analyze C# scripts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new script
    New {
        /// Script name
        name: String,
    },

    /// List scripts
    List,

    /// Build and execute a script
    Run {
        /// Script name or id
        script: String,
        /// Build with optimizations
        #[arg(long)]
        release: bool,
    },

    /// Compile a script without running it
    Build {
        /// Script name or id
        script: String,
        #[arg(long)]
        release: bool,
    },

    /// Publish a script as a standalone artifact
    Publish {
        /// Script name or id
        script: String,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Target runtime id (e.g. linux-x64)
        #[arg(long)]
        runtime: Option<String>,
        /// Bundle the runtime with the artifact (requires --runtime)
        #[arg(long)]
        self_contained: bool,
        /// Produce a single-file artifact (requires --runtime)
        #[arg(long)]
        single_file: bool,
        /// Trim unused framework code (requires --runtime)
        #[arg(long)]
        trimmed: bool,
        /// Clear the output directory first
        #[arg(long)]
        clean: bool,
    },

    /// Report diagnostics for a script
    Check {
        /// Script name or id
        script: String,
    },

    /// Watch the scripts directory and print engine events
    Watch,
}

async fn resolve_script(store: &FileScriptStore, reference: &str) -> Result<Script> {
    if let Ok(id) = Uuid::parse_str(reference) {
        return Ok(store.get(id).await?);
    }
    store
        .list()
        .await?
        .into_iter()
        .find(|s| s.name == reference)
        .ok_or_else(|| anyhow!("no script named '{reference}'"))
}

fn pipeline(env: &EnvConfig, events: Events) -> BuildPipeline {
    let generator = Arc::new(ToolchainResourceGenerator::new(
        &env.dotnet,
        env.scratch_dir(),
    ));
    BuildPipeline::new(
        &env.dotnet,
        env.work_dir(),
        Arc::new(ResourcesCache::new(generator)),
        events,
    )
}

/// Cancellation token wired to ctrl-c
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn run_new(env: &EnvConfig, file_config: &ScriptpadConfig, name: String) -> Result<()> {
    let store = FileScriptStore::new(env.scripts_dir());
    if store.list().await?.iter().any(|s| s.name == name) {
        return Err(anyhow!("script '{name}' already exists"));
    }

    let mut script = Script::new(name, "");
    script.config.kind = file_config.default_kind();
    script.config.target_framework_version = file_config.default_framework();
    script
        .config
        .namespaces
        .extend(file_config.defaults.namespaces.iter().cloned());
    store.save(&script).await?;

    println!("Created {} ({})", script.name, script.id);
    Ok(())
}

async fn run_list(env: &EnvConfig) -> Result<()> {
    let store = FileScriptStore::new(env.scripts_dir());
    let scripts = store.list().await?;
    if scripts.is_empty() {
        println!("No scripts in {}", env.scripts_dir().display());
        return Ok(());
    }
    for script in scripts {
        println!(
            "{}  {}  [{} / {}]",
            script.id,
            script.name,
            script.config.kind.as_str(),
            script.config.target_framework_version
        );
    }
    Ok(())
}

async fn run_script(env: &EnvConfig, reference: &str, release: bool) -> Result<()> {
    let store = FileScriptStore::new(env.scripts_dir());
    let script = resolve_script(&store, reference).await?;

    let events = Events::new();
    let mut rx = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let AppEvent::ScriptOutputEmitted { output, .. } = event {
                println!("{output}");
            }
        }
    });

    let options = BuildOptions {
        optimization: if release {
            OptimizationLevel::Release
        } else {
            OptimizationLevel::Debug
        },
    };
    let exit_code = pipeline(env, events)
        .run(&script, &options, &cancel_on_ctrl_c())
        .await?;
    printer.abort();

    if exit_code != 0 {
        return Err(anyhow!("script exited with code {exit_code}"));
    }
    Ok(())
}

async fn run_build(env: &EnvConfig, reference: &str, release: bool) -> Result<()> {
    let store = FileScriptStore::new(env.scripts_dir());
    let script = resolve_script(&store, reference).await?;

    let options = BuildOptions {
        optimization: if release {
            OptimizationLevel::Release
        } else {
            OptimizationLevel::Debug
        },
    };
    let result = pipeline(env, Events::new())
        .build(&script, &options, &cancel_on_ctrl_c())
        .await?;

    println!("Built {}", result.binary_path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_publish(
    env: &EnvConfig,
    reference: &str,
    output: PathBuf,
    runtime: Option<String>,
    self_contained: bool,
    single_file: bool,
    trimmed: bool,
    clean: bool,
) -> Result<()> {
    let store = FileScriptStore::new(env.scripts_dir());
    let script = resolve_script(&store, reference).await?;

    let mut options = PublishOptions::new(script.name.as_str(), output.display().to_string());
    options.delete_existing_files = clean;
    options.set_runtime_id(runtime);
    options.set_self_contained(self_contained);
    options.set_single_file(single_file);
    options.set_trimmed(trimmed);

    let result = pipeline(env, Events::new())
        .publish(&script, &options, &cancel_on_ctrl_c())
        .await?;

    println!("Published to {}", result.output_dir.display());
    Ok(())
}

async fn run_check(env: &EnvConfig, reference: &str) -> Result<()> {
    let Some(program) = env.intel.program.clone().filter(|_| env.intel.available()) else {
        return Err(anyhow!(
            "code intelligence is not configured; set SCRIPTPAD_INTEL_SERVER"
        ));
    };

    let store = Arc::new(FileScriptStore::new(env.scripts_dir()));
    let script = resolve_script(&store, reference).await?;

    let launcher = Arc::new(ProcessServerLauncher::new(
        program,
        env.intel.args.clone(),
        env.intel.request_timeout,
    ));
    let catalog = Arc::new(ServerCatalog::new(launcher, store, Events::new()));
    let dispatcher = Dispatcher::new(catalog.clone());

    let report = dispatcher.check_code(script.id).await?;
    catalog.close_all().await;

    if report.quick_fixes.is_empty() {
        println!("No diagnostics");
        return Ok(());
    }
    for fix in &report.quick_fixes {
        let severity = fix.severity.as_deref().unwrap_or("info");
        let location = if fix.in_user_code {
            format!("{}:{}", fix.line, fix.column)
        } else {
            "generated code".to_string()
        };
        println!("[{severity}] {location}  {}", fix.text);
    }
    Ok(())
}

async fn run_watch(env: &EnvConfig) -> Result<()> {
    tokio::fs::create_dir_all(env.scripts_dir()).await?;

    let events = Events::new();
    let mut rx = events.subscribe();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watcher = spawn_watcher(env.scripts_dir(), events, shutdown_rx);

    info!(dir = %env.scripts_dir().display(), "Watching scripts directory");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(AppEvent::ScriptDirectoryChanged { path }) => println!("changed: {path}"),
                Ok(_) => {}
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = watcher.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env files (global first, then project - project overrides)
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".scriptpad/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Quiet for commands whose stdout is the product
    let log_level = match &cli.command {
        Commands::List | Commands::Check { .. } => Level::WARN,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let env = EnvConfig::load();
    let file_config = ScriptpadConfig::load();

    match cli.command {
        Commands::New { name } => run_new(&env, &file_config, name).await?,
        Commands::List => run_list(&env).await?,
        Commands::Run { script, release } => run_script(&env, &script, release).await?,
        Commands::Build { script, release } => run_build(&env, &script, release).await?,
        Commands::Publish {
            script,
            output,
            runtime,
            self_contained,
            single_file,
            trimmed,
            clean,
        } => {
            run_publish(
                &env,
                &script,
                output,
                runtime,
                self_contained,
                single_file,
                trimmed,
                clean,
            )
            .await?
        }
        Commands::Check { script } => run_check(&env, &script).await?,
        Commands::Watch => run_watch(&env).await?,
    }

    Ok(())
}
