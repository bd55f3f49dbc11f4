//! Integration tests for the Scriptpad engine
//!
//! These exercise the session catalog, dispatcher, and build pipeline
//! together, using canned intelligence servers and a stub toolchain.

mod test_utils;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use scriptpad::assemble::{assemble, AssembleOptions};
use scriptpad::build::{BuildOptions, BuildPipeline};
use scriptpad::events::Events;
use scriptpad::intel::Dispatcher;
use scriptpad::resources::{ResourcesCache, ToolchainResourceGenerator};
use scriptpad::scripts::{FileScriptStore, ScriptStore};
use scriptpad_types::{intel_methods, AppEvent, PublishOptions, Script, SessionStatus};
use test_utils::{catalog_with, write_stub_dotnet, CannedLauncher};

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_concurrent_session_starts_coalesce() {
    let launcher = Arc::new(CannedLauncher::new());
    let script = Script::new("s", "Console.WriteLine(1);");
    let catalog = catalog_with(launcher.clone(), &[script.clone()]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let catalog = catalog.clone();
        let id = script.id;
        handles.push(tokio::spawn(async move {
            catalog.lease(id, true).await.map(|l| l.is_some())
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(launcher.launches(), 1);
    assert_eq!(catalog.session_count().await, 1);
}

#[tokio::test]
async fn test_close_then_reopen_gets_fresh_server() {
    let launcher = Arc::new(CannedLauncher::new());
    let script = Script::new("s", "1;");
    let catalog = catalog_with(launcher.clone(), &[script.clone()]).await;

    catalog.lease(script.id, true).await.unwrap().unwrap();
    catalog.close(script.id).await;
    assert!(!catalog.has_session(script.id).await);

    catalog.lease(script.id, true).await.unwrap().unwrap();
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_close_and_lease_leaves_no_orphan_server() {
    let launcher = Arc::new(CannedLauncher::new());
    let script = Script::new("s", "1;");
    let catalog = catalog_with(launcher.clone(), &[script.clone()]).await;

    // Hammer open/close on one id; a lease that loses the race against a
    // close must not launch into the removed entry
    for _ in 0..50 {
        let leaser = {
            let catalog = catalog.clone();
            let id = script.id;
            tokio::spawn(async move { catalog.lease(id, true).await.map(|l| l.is_some()) })
        };
        let closer = {
            let catalog = catalog.clone();
            let id = script.id;
            tokio::spawn(async move { catalog.close(id).await })
        };
        assert!(leaser.await.unwrap().unwrap());
        closer.await.unwrap();
    }

    catalog.close(script.id).await;
    assert_eq!(catalog.session_count().await, 0);
    assert_eq!(
        launcher.live_transports(),
        0,
        "every launched server must be reachable by close"
    );
}

#[tokio::test]
async fn test_crashed_server_relaunches_on_next_request() {
    let launcher = Arc::new(CannedLauncher::new());
    let script = Script::new("s", "1;");
    let catalog = catalog_with(launcher.clone(), &[script.clone()]).await;
    let dispatcher = Dispatcher::new(catalog.clone());

    dispatcher.check_code(script.id).await.unwrap();
    launcher.kill_current();
    dispatcher.check_code(script.id).await.unwrap();

    assert_eq!(launcher.launches(), 2);
    // Every (re)start pushes the buffer before serving requests
    let calls = launcher.calls();
    assert_eq!(
        calls,
        vec!["updatebuffer", "checkcode", "updatebuffer", "checkcode"]
    );
}

// ============================================================================
// Dispatcher end to end
// ============================================================================

#[tokio::test]
async fn test_diagnostics_come_back_in_user_coordinates() {
    let launcher = Arc::new(CannedLauncher::new());
    let script = Script::new("s", "var a = 1;\nvar b = missing;\nvar c = 3;");
    let prefix = assemble(&script, &AssembleOptions::default()).prefix_line_count;
    launcher.set_result(
        intel_methods::CHECK_CODE,
        json!({
            "quick_fixes": [
                {"text": "CS0103: The name 'missing' does not exist",
                 "line": prefix + 2, "column": 9,
                 "end_line": prefix + 2, "end_column": 16, "severity": "error"},
                {"text": "prefix-internal hint", "line": 2, "column": 1,
                 "end_line": 2, "end_column": 2, "severity": "hint"}
            ]
        }),
    );

    let catalog = catalog_with(launcher, &[script.clone()]).await;
    let dispatcher = Dispatcher::new(catalog);

    let report = dispatcher.check_code(script.id).await.unwrap();
    assert_eq!(report.quick_fixes.len(), 2);

    let user_fix = &report.quick_fixes[0];
    assert_eq!(user_fix.line, 2);
    assert_eq!(user_fix.end_line, 2);
    assert!(user_fix.in_user_code);

    let hidden_fix = &report.quick_fixes[1];
    assert_eq!(hidden_fix.line, 1);
    assert!(!hidden_fix.in_user_code);
}

#[tokio::test]
async fn test_buffer_update_reaches_only_live_sessions() {
    let launcher = Arc::new(CannedLauncher::new());
    let mut script = Script::new("s", "var x = 1;");
    let catalog = catalog_with(launcher.clone(), &[script.clone()]).await;
    let dispatcher = Dispatcher::new(catalog);

    // No session yet: nothing to update
    dispatcher.buffer_updated(&script).await.unwrap();
    assert_eq!(launcher.launches(), 0);

    dispatcher.check_code(script.id).await.unwrap();
    script.update_code("var x = 2;");
    dispatcher.buffer_updated(&script).await.unwrap();

    assert_eq!(launcher.launches(), 1);
    assert_eq!(
        launcher.calls(),
        vec!["updatebuffer", "checkcode", "updatebuffer"]
    );
}

#[tokio::test]
async fn test_check_on_unknown_script_is_empty_not_an_error() {
    let launcher = Arc::new(CannedLauncher::new());
    let catalog = catalog_with(launcher.clone(), &[]).await;
    let dispatcher = Dispatcher::new(catalog);

    let report = dispatcher.check_code(uuid::Uuid::new_v4()).await.unwrap();
    assert!(report.quick_fixes.is_empty());
    assert_eq!(launcher.launches(), 0);
}

// ============================================================================
// Build pipeline end to end
// ============================================================================

fn stub_pipeline(dotnet: &std::path::Path, work_dir: &std::path::Path, events: Events) -> BuildPipeline {
    let generator = Arc::new(ToolchainResourceGenerator::new(dotnet, work_dir));
    BuildPipeline::new(
        dotnet,
        work_dir,
        Arc::new(ResourcesCache::new(generator)),
        events,
    )
}

#[tokio::test]
async fn test_store_build_run_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileScriptStore::new(dir.path().join("scripts"));

    let script = Script::new("hello", "Console.WriteLine(\"hi\");");
    store.save(&script).await.unwrap();
    let loaded = store.get(script.id).await.unwrap();

    let dotnet = write_stub_dotnet(dir.path(), "hello");
    let events = Events::new();
    let mut rx = events.subscribe();
    let pipeline = stub_pipeline(&dotnet, &dir.path().join("work"), events);

    let exit_code = pipeline
        .run(&loaded, &BuildOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_code, 0);

    let mut outputs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::ScriptOutputEmitted { script_id, output } = event {
            assert_eq!(script_id, script.id);
            outputs.push(output);
        }
    }
    assert_eq!(outputs, vec!["stub output"]);
}

#[tokio::test]
async fn test_publish_passes_runtime_flags_to_toolchain() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("args.log");
    let dotnet = dir.path().join("dotnet");
    std::fs::write(
        &dotnet,
        format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> {}\n", log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&dotnet, std::fs::Permissions::from_mode(0o755)).unwrap();

    let pipeline = stub_pipeline(&dotnet, &dir.path().join("work"), Events::new());
    let script = Script::new("app", "1;");

    let out_dir = dir.path().join("publish").join("out");
    let mut options = PublishOptions::new("app", out_dir.display().to_string());
    options.set_runtime_id(Some("linux-x64".to_string()));
    options.set_self_contained(true);
    options.set_single_file(true);
    options.set_trimmed(true);

    pipeline
        .publish(&script, &options, &CancellationToken::new())
        .await
        .unwrap();

    let args = std::fs::read_to_string(&log).unwrap();
    assert!(args.contains("publish"));
    assert!(args.contains("--runtime linux-x64"));
    assert!(args.contains("--self-contained=true"));
    assert!(args.contains("-p:PublishSingleFile=true"));
    assert!(args.contains("-p:PublishTrimmed=true"));
    assert!(!args.contains("-p:PublishReadyToRun"));
}

#[tokio::test]
async fn test_publish_without_runtime_sends_no_platform_flags() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("args.log");
    let dotnet = dir.path().join("dotnet");
    std::fs::write(
        &dotnet,
        format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> {}\n", log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&dotnet, std::fs::Permissions::from_mode(0o755)).unwrap();

    let pipeline = stub_pipeline(&dotnet, &dir.path().join("work"), Events::new());
    let script = Script::new("app", "1;");

    let mut options = PublishOptions::new("app", dir.path().join("out").display().to_string());
    // Platform toggles without a runtime id are ignored
    options.set_self_contained(true);
    options.set_trimmed(true);

    pipeline
        .publish(&script, &options, &CancellationToken::new())
        .await
        .unwrap();

    let args = std::fs::read_to_string(&log).unwrap();
    assert!(!args.contains("--runtime"));
    assert!(!args.contains("--self-contained"));
    assert!(!args.contains("-p:PublishTrimmed"));
}

#[tokio::test]
async fn test_publish_clean_clears_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = write_stub_dotnet(dir.path(), "app");
    let pipeline = stub_pipeline(&dotnet, &dir.path().join("work"), Events::new());
    let script = Script::new("app", "1;");

    let out_dir = dir.path().join("publish").join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::write(out_dir.join("stale.dll"), "old").unwrap();

    let mut options = PublishOptions::new("app", out_dir.display().to_string());
    options.delete_existing_files = true;

    pipeline
        .publish(&script, &options, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!out_dir.join("stale.dll").exists());
}

// ============================================================================
// Session status events
// ============================================================================

#[tokio::test]
async fn test_session_lifecycle_emits_status_events() {
    let launcher = Arc::new(CannedLauncher::new());
    let store = Arc::new(scriptpad::scripts::InMemoryScriptStore::new());
    let script = Script::new("s", "1;");
    store.save(&script).await.unwrap();

    let events = Events::new();
    let mut rx = events.subscribe();
    let catalog = scriptpad::intel::ServerCatalog::new(launcher, store, events.clone());

    catalog.lease(script.id, true).await.unwrap().unwrap();
    catalog.close(script.id).await;

    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::SessionStatusChanged { script_id, status } = event {
            assert_eq!(script_id, script.id);
            statuses.push(status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Starting,
            SessionStatus::Ready,
            SessionStatus::Stopped
        ]
    );
}
