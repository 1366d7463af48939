//! File-driven ingestion
//!
//! Every change notification runs as its own task:
//! classify -> resolve (skipped for tracked files) -> read -> parse -> merge,
//! ending in a [`GameUpdate`] on the updates channel. Notifications for a
//! path that is already being processed are folded into one extra pass.

use overachiever_core::classify::{classify, is_achievement_file_name};
use overachiever_core::merge::merge_status;
use overachiever_core::status;
use overachiever_core::{GameUpdate, OverachieverError, Result, UpdateSource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::library::{GameLibrary, SharedGame};
use crate::reader::{read_all_text, RetryPolicy};
use crate::registry::{absolute, FileEvent, PathKey, WatchRegistry};

struct Inner {
    library: Arc<GameLibrary>,
    registry: WatchRegistry,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<FileEvent>,
    updates: mpsc::UnboundedSender<GameUpdate>,
    /// Paths with a task running; `true` once another pass was requested
    in_flight: Mutex<HashMap<PathKey, bool>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

pub struct IngestionCoordinator {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionCoordinator {
    /// Create the coordinator and the receiving end of its updates.
    /// Must be called from within a Tokio runtime.
    pub fn new(library: Arc<GameLibrary>, policy: RetryPolicy) -> (Self, mpsc::UnboundedReceiver<GameUpdate>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            library,
            registry: WatchRegistry::new(),
            policy,
            events: events_tx,
            updates: updates_tx,
            in_flight: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        });
        let dispatcher = tokio::spawn(dispatch(inner.clone(), events_rx));

        let coordinator = Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        };
        (coordinator, updates_rx)
    }

    /// Sender for other producers of [`GameUpdate`]s, such as the poller
    pub fn update_sender(&self) -> mpsc::UnboundedSender<GameUpdate> {
        self.inner.updates.clone()
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.inner.registry
    }

    /// Queue a file event as if the OS had reported it
    pub fn handle_event(&self, event: FileEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Watch directories recursively, then feed every achievement file
    /// already inside them through the pipeline once.
    pub async fn start_watching(&self, directories: &[PathBuf]) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(OverachieverError::Watch("Watcher has been stopped".to_string()));
        }

        for dir in directories {
            if !dir.is_dir() {
                warn!("Watch directory does not exist: {}", dir.display());
                continue;
            }
            if let Err(e) = self.inner.registry.watch(dir, true, self.inner.events.clone()) {
                warn!("{}", e);
                continue;
            }

            let root = dir.clone();
            let found = tokio::task::spawn_blocking(move || scan(&root))
                .await
                .map_err(|e| OverachieverError::Watch(format!("Initial scan failed: {}", e)))?;
            info!("Found {} achievement file(s) in {}", found.len(), dir.display());
            for path in found {
                self.inner.route(path);
            }
        }
        Ok(())
    }

    /// Bind one file to a known game and watch it. The file is processed
    /// right away when it already exists.
    pub async fn start_watching_single_file(&self, game: SharedGame, path: &Path) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(OverachieverError::Watch("Watcher has been stopped".to_string()));
        }

        let path = absolute(path);
        self.inner.registry.bind(&path, game.clone());
        {
            let mut game = game.lock().await;
            debug!("Tracking {} for app {}", path.display(), game.app_id);
            game.tracked_path = Some(path.clone());
        }

        if let Some(parent) = path.parent() {
            if !self.inner.registry.covers(parent) {
                self.inner.registry.watch(parent, false, self.inner.events.clone())?;
            }
        }

        if path.is_file() {
            self.inner.route(path);
        }
        Ok(())
    }

    /// Drop all watches and wait for in-flight work. Safe to call twice.
    pub async fn stop_watching(&self) {
        self.inner.registry.unwatch();
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let dispatcher = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
    }
}

impl Drop for IngestionCoordinator {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn dispatch(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<FileEvent>) {
    // First half of a two-part rename; only the very next event may complete it
    let mut rename_from: Option<(PathBuf, Option<usize>)> = None;

    loop {
        let event = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let pending = rename_from.take();
        match event {
            FileEvent::Changed(path) => inner.route(path),
            FileEvent::Renamed { from, to } => inner.renamed(&from, to).await,
            FileEvent::RenameFrom { path, tracker } => rename_from = Some((path, tracker)),
            FileEvent::RenameTo { path, tracker } => match pending {
                Some((from, from_tracker)) if from_tracker == tracker => inner.renamed(&from, path).await,
                _ => inner.route(path),
            },
        }
    }
    debug!("File event dispatcher stopped");
}

fn scan(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_achievement_file_name))
        .map(|entry| entry.into_path())
        .collect()
}

impl Inner {
    /// Move a tracked binding before the new path is routed
    async fn renamed(self: &Arc<Self>, from: &Path, to: PathBuf) {
        if let Some(game) = self.registry.rebind(from, &to) {
            let mut game = game.lock().await;
            info!("Tracked file for app {} renamed to {}", game.app_id, to.display());
            game.tracked_path = Some(absolute(&to));
        }
        self.route(to);
    }

    fn route(self: &Arc<Self>, path: PathBuf) {
        if !self.registry.is_tracked(&path) {
            let matches = path.file_name().and_then(|n| n.to_str()).is_some_and(is_achievement_file_name);
            if !matches {
                return;
            }
        }
        self.submit(path);
    }

    fn submit(self: &Arc<Self>, path: PathBuf) {
        if self.cancel.is_cancelled() {
            return;
        }

        let key = PathKey::new(&path);
        {
            let mut in_flight = match self.in_flight.lock() {
                Ok(in_flight) => in_flight,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(rerun) = in_flight.get_mut(&key) {
                *rerun = true;
                return;
            }
            in_flight.insert(key.clone(), false);
        }

        let inner = self.clone();
        self.tracker.spawn(async move {
            loop {
                if let Err(e) = inner.process_file(&path).await {
                    match e {
                        OverachieverError::Unresolvable(_) => debug!("Skipped {}", path.display()),
                        e => warn!("Failed to process {}: {}", path.display(), e),
                    }
                }
                if !inner.take_rerun(&key) {
                    break;
                }
            }
        });
    }

    /// Whether another pass was requested; clears the in-flight entry if not
    fn take_rerun(&self, key: &PathKey) -> bool {
        let mut in_flight = match self.in_flight.lock() {
            Ok(in_flight) => in_flight,
            Err(poisoned) => poisoned.into_inner(),
        };
        match in_flight.get_mut(key) {
            Some(rerun) if *rerun && !self.cancel.is_cancelled() => {
                *rerun = false;
                true
            }
            _ => {
                in_flight.remove(key);
                false
            }
        }
    }

    async fn process_file(&self, path: &Path) -> Result<()> {
        let Some(class) = classify(path) else {
            debug!("Unsupported achievement file: {}", path.display());
            return Ok(());
        };

        let game = match self.registry.lookup(path) {
            Some(game) => game,
            None => {
                let app_id = class
                    .app_id
                    .ok_or_else(|| OverachieverError::Unresolvable(path.to_path_buf()))?;
                self.library.get_or_resolve(app_id).await
            }
        };

        let content = read_all_text(path, self.policy).await?;
        let status = status::parse(class.format, &content);

        // Nothing is merged once stopping has begun
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let update = {
            let mut game = game.lock().await;
            let newly_unlocked = merge_status(&mut game, &status);
            GameUpdate {
                game: game.clone(),
                newly_unlocked,
                source: UpdateSource::File {
                    path: path.to_path_buf(),
                },
            }
        };

        if update.has_unlocks() {
            info!(
                "{}: {} new achievement(s) from {}",
                update.game.name,
                update.newly_unlocked.len(),
                path.display()
            );
        } else {
            debug!("{}: no new achievements in {}", update.game.name, path.display());
        }
        let _ = self.updates.send(update);
        Ok(())
    }
}
