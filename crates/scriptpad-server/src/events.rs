// crates/scriptpad-server/src/events.rs
// Event bus - engine notifications for the UI layer, plus the scripts
// directory watcher that feeds ScriptDirectoryChanged

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use scriptpad_types::AppEvent;

/// Debounce window for rapid directory changes
const DEBOUNCE_MS: u64 = 500;

/// Broadcast bus for engine events. Cheap to clone; emitting with no
/// subscribers is fine.
#[derive(Clone)]
pub struct Events {
    tx: broadcast::Sender<AppEvent>,
}

impl Events {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        // No receivers is not an error
        let _ = self.tx.send(event);
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches the scripts directory and publishes debounced
/// `ScriptDirectoryChanged` events until the shutdown signal flips.
pub struct ScriptDirWatcher {
    scripts_dir: PathBuf,
    events: Events,
    shutdown: watch::Receiver<bool>,
}

impl ScriptDirWatcher {
    pub fn new(scripts_dir: PathBuf, events: Events, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            scripts_dir,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(dir = %self.scripts_dir.display(), "Script directory watcher started");

        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher: RecommendedWatcher = match Watcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            // try_send: never block the notify callback thread
                            if let Err(e) = tx.try_send(path) {
                                debug!("Directory change dropped (channel full or closed): {e}");
                            }
                        }
                    }
                }
                Err(e) => warn!("Directory watcher notify error: {e}"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        ) {
            Ok(w) => w,
            Err(e) => {
                warn!("Failed to create directory watcher: {e}");
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.scripts_dir, RecursiveMode::Recursive) {
            warn!(dir = %self.scripts_dir.display(), "Failed to watch scripts directory: {e}");
            return;
        }

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let debounce = Duration::from_millis(DEBOUNCE_MS);

        loop {
            tokio::select! {
                Some(path) = rx.recv() => {
                    pending.insert(path, Instant::now());
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let now = Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, at)| now.duration_since(**at) >= debounce)
                        .map(|(p, _)| p.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        self.events.emit(AppEvent::ScriptDirectoryChanged {
                            path: path.display().to_string(),
                        });
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Script directory watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn the watcher on the runtime
pub fn spawn_watcher(
    scripts_dir: PathBuf,
    events: Events,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        ScriptDirWatcher::new(scripts_dir, events, shutdown).run().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptpad_types::SessionStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let events = Events::new();
        events.emit(AppEvent::ScriptDirectoryChanged {
            path: "/scripts".into(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = Events::new();
        let mut rx = events.subscribe();
        let id = Uuid::new_v4();

        events.emit(AppEvent::SessionStatusChanged {
            script_id: id,
            status: SessionStatus::Ready,
        });

        match rx.recv().await.unwrap() {
            AppEvent::SessionStatusChanged { script_id, status } => {
                assert_eq!(script_id, id);
                assert_eq!(status, SessionStatus::Ready);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watcher_emits_on_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let events = Events::new();
        let mut rx = events.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_watcher(dir.path().to_path_buf(), events, shutdown_rx);

        // Give the watcher time to register, then touch a file
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::fs::write(dir.path().join("new.csx"), "1 + 1").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should emit within the debounce window")
            .unwrap();
        assert!(matches!(event, AppEvent::ScriptDirectoryChanged { .. }));

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
