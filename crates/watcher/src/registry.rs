//! Watched directories and explicitly tracked files

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use overachiever_core::{OverachieverError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::library::SharedGame;

/// Case-insensitive absolute path, the key of the tracked-file map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey(String);

impl PathKey {
    pub fn new(path: &Path) -> Self {
        PathKey(absolute(path).to_string_lossy().to_lowercase())
    }
}

/// Absolute form of `path` with its parent directory canonicalized when it
/// exists. The file itself may already be gone (rename source).
pub fn absolute(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or(path),
        _ => path,
    }
}

/// A file system change, reduced to what the pipeline cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// Created, written, or otherwise touched
    Changed(PathBuf),
    /// Rename with both ends known
    Renamed { from: PathBuf, to: PathBuf },
    /// First half of a rename reported in two parts. Halves of one rename
    /// share the backend's tracker id when it has one.
    RenameFrom { path: PathBuf, tracker: Option<usize> },
    /// Second half of a rename reported in two parts
    RenameTo { path: PathBuf, tracker: Option<usize> },
}

/// Reduce a notify event. Removals and access events are dropped.
pub fn translate(event: &Event) -> Vec<FileEvent> {
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            vec![FileEvent::Renamed {
                from: event.paths[0].clone(),
                to: event.paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            let tracker = event.attrs.tracker();
            event
                .paths
                .iter()
                .cloned()
                .map(|path| FileEvent::RenameFrom { path, tracker })
                .collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            let tracker = event.attrs.tracker();
            event
                .paths
                .iter()
                .cloned()
                .map(|path| FileEvent::RenameTo { path, tracker })
                .collect()
        }
        EventKind::Create(_) | EventKind::Modify(_) => event.paths.iter().cloned().map(FileEvent::Changed).collect(),
        _ => Vec::new(),
    }
}

struct WatchHandle {
    root: PathBuf,
    recursive: bool,
    _watcher: RecommendedWatcher,
}

#[derive(Default)]
pub struct WatchRegistry {
    tracked: RwLock<HashMap<PathKey, SharedGame>>,
    watchers: Mutex<Vec<WatchHandle>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a file to a game, replacing any earlier binding of that path
    pub fn bind(&self, path: &Path, game: SharedGame) {
        let mut tracked = match self.tracked.write() {
            Ok(tracked) => tracked,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracked.insert(PathKey::new(path), game);
    }

    pub fn lookup(&self, path: &Path) -> Option<SharedGame> {
        self.tracked.read().ok()?.get(&PathKey::new(path)).cloned()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }

    /// Move a binding from `from` to `to` in one step. Returns the bound
    /// game, or `None` when `from` was not tracked.
    pub fn rebind(&self, from: &Path, to: &Path) -> Option<SharedGame> {
        let mut tracked = match self.tracked.write() {
            Ok(tracked) => tracked,
            Err(poisoned) => poisoned.into_inner(),
        };
        let game = tracked.remove(&PathKey::new(from))?;
        tracked.insert(PathKey::new(to), game.clone());
        Some(game)
    }

    /// Whether an existing watch already reports changes inside `dir`
    pub fn covers(&self, dir: &Path) -> bool {
        let dir = absolute(dir);
        let watchers = match self.watchers.lock() {
            Ok(watchers) => watchers,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers
            .iter()
            .any(|w| w.root == dir || (w.recursive && dir.starts_with(&w.root)))
    }

    /// Start a notify watch on `root`; translated events go to `events`
    pub fn watch(&self, root: &Path, recursive: bool, events: mpsc::UnboundedSender<FileEvent>) -> Result<()> {
        let root = std::fs::canonicalize(root).map_err(|e| OverachieverError::io(root, e))?;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in translate(&event) {
                    if events.send(change).is_err() {
                        // Dispatcher is gone, we are shutting down
                        return;
                    }
                }
            }
            Err(e) => error!("Watch error: {:?}", e),
        })
        .map_err(|e| OverachieverError::Watch(format!("Failed to create watcher: {}", e)))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root, mode)
            .map_err(|e| OverachieverError::Watch(format!("Failed to watch {}: {}", root.display(), e)))?;
        info!("Watching path: {} (recursive: {})", root.display(), recursive);

        let mut watchers = match self.watchers.lock() {
            Ok(watchers) => watchers,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers.push(WatchHandle {
            root,
            recursive,
            _watcher: watcher,
        });
        Ok(())
    }

    /// Drop every watch. Tracked bindings are kept.
    pub fn unwatch(&self) {
        let mut watchers = match self.watchers.lock() {
            Ok(watchers) => watchers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !watchers.is_empty() {
            info!("Stopped {} watcher(s)", watchers.len());
        }
        watchers.clear();
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use overachiever_core::{Game, Platform};
    use std::sync::Arc;

    fn shared(name: &str) -> SharedGame {
        Arc::new(tokio::sync::Mutex::new(Game::new(480, Platform::Steam, name)))
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn lookups_ignore_case() {
        let registry = WatchRegistry::new();
        registry.bind(Path::new("/Saves/480/Achievements.INI"), shared("Spacewar"));
        assert!(registry.is_tracked(Path::new("/saves/480/achievements.ini")));
        assert!(!registry.is_tracked(Path::new("/saves/480/other.ini")));
    }

    #[test]
    fn rebind_moves_the_binding() {
        let registry = WatchRegistry::new();
        let game = shared("Spacewar");
        let old = Path::new("/saves/480/achievements.ini");
        let new = Path::new("/saves/480/achievements.ini.new");
        registry.bind(old, game.clone());

        let moved = registry.rebind(old, new).unwrap();
        assert!(Arc::ptr_eq(&moved, &game));
        assert!(!registry.is_tracked(old));
        assert!(registry.is_tracked(new));
    }

    #[test]
    fn rebind_of_untracked_path_changes_nothing() {
        let registry = WatchRegistry::new();
        assert!(registry.rebind(Path::new("/a.ini"), Path::new("/b.ini")).is_none());
        assert!(!registry.is_tracked(Path::new("/b.ini")));
    }

    #[test]
    fn rename_is_never_half_applied() {
        let registry = Arc::new(WatchRegistry::new());
        let old = PathBuf::from("/saves/1/achievements.json");
        let new = PathBuf::from("/saves/2/achievements.json");
        registry.bind(&old, shared("Game"));

        let observer = {
            let registry = registry.clone();
            let (old, new) = (old.clone(), new.clone());
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let tracked = registry.tracked.read().unwrap();
                    let at_old = tracked.contains_key(&PathKey::new(&old));
                    let at_new = tracked.contains_key(&PathKey::new(&new));
                    assert!(at_old ^ at_new, "binding visible at both or neither path");
                }
            })
        };

        for i in 0..1_000 {
            let (from, to) = if i % 2 == 0 { (&old, &new) } else { (&new, &old) };
            assert!(registry.rebind(from, to).is_some());
        }
        observer.join().unwrap();
    }

    #[test]
    fn translates_notify_events() {
        let created = event(EventKind::Create(CreateKind::File), &["/s/480/achievements.json"]);
        assert_eq!(translate(&created), vec![FileEvent::Changed("/s/480/achievements.json".into())]);

        let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &["/s/a.ini"]);
        assert_eq!(translate(&written), vec![FileEvent::Changed("/s/a.ini".into())]);

        let renamed = event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &["/s/a.ini", "/s/b.ini"]);
        assert_eq!(
            translate(&renamed),
            vec![FileEvent::Renamed {
                from: "/s/a.ini".into(),
                to: "/s/b.ini".into()
            }]
        );

        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/s/a.ini"]).set_tracker(7);
        assert_eq!(
            translate(&from),
            vec![FileEvent::RenameFrom {
                path: "/s/a.ini".into(),
                tracker: Some(7)
            }]
        );

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/s/b.ini"]);
        assert_eq!(
            translate(&to),
            vec![FileEvent::RenameTo {
                path: "/s/b.ini".into(),
                tracker: None
            }]
        );

        let removed = event(EventKind::Remove(RemoveKind::File), &["/s/a.ini"]);
        assert!(translate(&removed).is_empty());
    }

    #[tokio::test]
    async fn watch_marks_directory_as_covered() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("480");
        std::fs::create_dir(&nested).unwrap();

        let registry = WatchRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!registry.covers(&nested));

        registry.watch(dir.path(), true, tx).unwrap();
        assert!(registry.covers(dir.path()));
        assert!(registry.covers(&nested));

        registry.unwatch();
        registry.unwatch();
        assert_eq!(registry.watch_count(), 0);
        assert!(!registry.covers(&nested));
    }
}
