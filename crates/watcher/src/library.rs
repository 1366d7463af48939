//! The in-memory game library
//!
//! Memoizes [`GameResolver`] per appId and owns every game behind its own
//! async mutex, so file-driven and poll-driven merges into one game never
//! interleave.

use chrono::Utc;
use overachiever_core::Game;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::resolver::GameResolver;

pub type SharedGame = Arc<tokio::sync::Mutex<Game>>;

pub struct GameLibrary {
    resolver: Arc<GameResolver>,
    games: RwLock<HashMap<u64, SharedGame>>,
    /// One resolution per appId at a time
    resolving: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    placeholder_retry: Duration,
}

impl GameLibrary {
    pub fn new(resolver: Arc<GameResolver>, placeholder_retry: Duration) -> Self {
        Self {
            resolver,
            games: RwLock::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
            placeholder_retry,
        }
    }

    pub fn get(&self, app_id: u64) -> Option<SharedGame> {
        self.games.read().ok()?.get(&app_id).cloned()
    }

    /// All games, in no particular order
    pub fn games(&self) -> Vec<SharedGame> {
        self.games
            .read()
            .map(|games| games.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.games.read().map(|games| games.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a game unless one with the same appId is already known. A held
    /// placeholder that is not locked is upgraded in place to a resolved
    /// `game`. Returns the game now held for that appId.
    pub fn insert(&self, game: Game) -> SharedGame {
        let mut games = match self.games.write() {
            Ok(games) => games,
            Err(poisoned) => poisoned.into_inner(),
        };
        let app_id = game.app_id;
        let Some(held) = games.get(&app_id).cloned() else {
            let shared = Arc::new(tokio::sync::Mutex::new(game));
            games.insert(app_id, shared.clone());
            return shared;
        };
        drop(games);

        if !game.is_placeholder() {
            if let Ok(mut current) = held.try_lock() {
                if current.is_placeholder() {
                    debug!("Replacing placeholder for app {} with '{}'", app_id, game.name);
                    let tracked_path = current.tracked_path.take();
                    *current = game;
                    current.tracked_path = current.tracked_path.take().or(tracked_path);
                }
            }
        }
        held
    }

    /// The known game for `app_id`, resolving it on first sight. Placeholder
    /// games are resolved again once they are older than the retry interval.
    pub async fn get_or_resolve(&self, app_id: u64) -> SharedGame {
        if let Some(game) = self.get(app_id) {
            if !self.is_stale(&game).await {
                return game;
            }
        }

        let gate = self.gate(app_id);
        let _resolving = gate.lock().await;

        // Someone else may have finished while we waited
        let existing = self.get(app_id);
        if let Some(game) = &existing {
            if !self.is_stale(game).await {
                return game.clone();
            }
        }

        let resolved = self.resolver.resolve(app_id).await;
        match existing {
            Some(game) => {
                let mut current = game.lock().await;
                if resolved.is_placeholder() {
                    current.resolved_at = Utc::now();
                    debug!("App {} is still unknown", app_id);
                } else {
                    info!("Placeholder for app {} resolved as '{}'", app_id, resolved.name);
                    let tracked_path = current.tracked_path.take();
                    *current = resolved;
                    current.tracked_path = tracked_path;
                }
                drop(current);
                game
            }
            None => {
                debug!("Added app {} to library", app_id);
                self.insert(resolved)
            }
        }
    }

    async fn is_stale(&self, game: &SharedGame) -> bool {
        let game = game.lock().await;
        if !game.is_placeholder() {
            return false;
        }
        let age = Utc::now().signed_duration_since(game.resolved_at);
        age.to_std().map(|age| age >= self.placeholder_retry).unwrap_or(false)
    }

    fn gate(&self, app_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = match self.resolving.lock() {
            Ok(gates) => gates,
            Err(poisoned) => poisoned.into_inner(),
        };
        gates.entry(app_id).or_default().clone()
    }
}
