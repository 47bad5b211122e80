//! Source watcher
//!
//! Watches the data directory and starts a reload once handler sources or the
//! handler document have been quiet for the debounce period.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{CreateKind, ModifyKind, RemoveKind},
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::reloader::{ReloadError, ReloadPhase, Reloader};
use crate::stager::SourceSyntax;

/// Decides which paths are worth a reload
#[derive(Debug, Clone)]
pub struct WatchFilter {
    source_dir: PathBuf,
    handlers_path: PathBuf,
    syntax: SourceSyntax,
    ignore_patterns: Vec<String>,
}

impl WatchFilter {
    pub fn new(source_dir: PathBuf, handlers_path: PathBuf, syntax: SourceSyntax) -> Self {
        Self {
            source_dir,
            handlers_path,
            syntax,
            ignore_patterns: vec![".swp".to_string(), ".tmp".to_string(), "~".to_string()],
        }
    }

    pub fn should_watch(&self, path: &Path) -> bool {
        if path == self.handlers_path {
            return true;
        }
        let name = path.to_string_lossy();
        if self.ignore_patterns.iter().any(|p| name.ends_with(p.as_str())) {
            return false;
        }
        path.parent() == Some(self.source_dir.as_path()) && self.syntax.is_source(path)
    }
}

/// Triggers reloads on source changes until stopped or dropped
pub struct SourceWatcher {
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SourceWatcher {
    /// Start watching the reloader's data directory
    pub fn start(reloader: &Reloader) -> Result<Self, notify::Error> {
        let config = reloader.config();
        std::fs::create_dir_all(&config.data_dir).map_err(notify::Error::io)?;
        let data_dir = config
            .data_dir
            .canonicalize()
            .map_err(notify::Error::io)?;
        let filter = WatchFilter::new(
            data_dir.join(&config.sources_dir_name),
            data_dir.join(&config.handlers_file),
            reloader.toolchain().syntax().clone(),
        );
        let debounce = config.watch_debounce();

        info!("Watching {:?} for handler changes", data_dir);

        let (tx, mut rx) = mpsc::channel(1024);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = tx.blocking_send(event);
                }
            },
            Config::default(),
        )?;
        watcher.watch(&data_dir, RecursiveMode::Recursive)?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let weak = reloader.downgrade();

        tokio::spawn(async move {
            let mut pending: Option<Instant> = None;
            loop {
                let deadline =
                    pending.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
                tokio::select! {
                    Some(event) = rx.recv() => {
                        if !is_change(&event.kind)
                            || !event.paths.iter().any(|path| filter.should_watch(path))
                        {
                            continue;
                        }
                        let Some(reloader) = weak.upgrade() else {
                            return;
                        };
                        if accepts_changes(reloader.phase()) {
                            debug!("Handler change: {:?}", event.paths);
                            pending = Some(Instant::now() + debounce);
                        } else {
                            debug!("Ignoring change during reload: {:?}", event.paths);
                        }
                    }
                    _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                        pending = None;
                        let Some(reloader) = weak.upgrade() else {
                            return;
                        };
                        match reloader.reload() {
                            Ok(_) => info!("Handler sources changed, reloading"),
                            Err(ReloadError::ReloadInProgress) => {
                                debug!("Reload already running, dropping change");
                            }
                            Err(e) => {
                                warn!("Automatic reload not started: {}", e);
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Source watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            watcher: Some(watcher),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.watcher = None;
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

/// A running reload writes default sources and picks up whatever is on disk
fn accepts_changes(phase: ReloadPhase) -> bool {
    phase == ReloadPhase::Idle
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(
                ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Name(_)
            )
            | EventKind::Remove(RemoveKind::File | RemoveKind::Any)
    )
}
