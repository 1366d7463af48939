//! Periodic reconciliation against authoritative providers
//!
//! Each tick checks every game whose acquisition method has a registered
//! [`AchievementCheck`]. Checks run a few at a time, each bounded by a
//! timeout, and one game's failure never affects the others.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use overachiever_core::merge::merge_fetched_list;
use overachiever_core::{
    AcquisitionMethod, Achievement, AuthoritativeApiClient, Game, GameUpdate, OverachieverError, Result, UpdateSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::library::{GameLibrary, SharedGame};

/// Games checked concurrently within one cycle
const MAX_CONCURRENT_CHECKS: usize = 4;

/// Provider-specific fetch of a game's current achievement list
#[async_trait]
pub trait AchievementCheck: Send + Sync {
    /// `None` when the provider has nothing for this game
    async fn fetch(&self, game: &Game) -> Result<Option<Vec<Achievement>>>;
}

/// Strategy for games owned on Steam
pub struct SteamApiCheck {
    api: Arc<dyn AuthoritativeApiClient>,
}

impl SteamApiCheck {
    pub fn new(api: Arc<dyn AuthoritativeApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AchievementCheck for SteamApiCheck {
    async fn fetch(&self, game: &Game) -> Result<Option<Vec<Achievement>>> {
        if !self.api.is_ready() {
            return Ok(None);
        }
        self.api.get_achievements(game.app_id).await
    }
}

pub struct ReconciliationScheduler {
    library: Arc<GameLibrary>,
    strategies: HashMap<AcquisitionMethod, Arc<dyn AchievementCheck>>,
    updates: mpsc::UnboundedSender<GameUpdate>,
    interval: Duration,
    fetch_timeout: Duration,
}

impl ReconciliationScheduler {
    pub fn new(
        library: Arc<GameLibrary>,
        updates: mpsc::UnboundedSender<GameUpdate>,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            library,
            strategies: HashMap::new(),
            updates,
            interval,
            fetch_timeout,
        }
    }

    pub fn with_strategy(mut self, method: AcquisitionMethod, check: Arc<dyn AchievementCheck>) -> Self {
        self.strategies.insert(method, check);
        self
    }

    /// Fetch the game's achievements from its provider and merge them in.
    /// Returns the achievements that became unlocked.
    pub async fn check_for_new_achievements(&self, game: &SharedGame) -> Result<Vec<Achievement>> {
        // Snapshot so the fetch does not hold the game lock
        let snapshot = game.lock().await.clone();
        let Some(check) = self.strategies.get(&snapshot.method) else {
            return Ok(Vec::new());
        };

        let fetched = tokio::time::timeout(self.fetch_timeout, check.fetch(&snapshot))
            .await
            .map_err(|_| OverachieverError::Timeout(self.fetch_timeout))??;
        let Some(fetched) = fetched else {
            debug!("No achievements available for {}", snapshot.name);
            return Ok(Vec::new());
        };

        let update = {
            let mut game = game.lock().await;
            let newly_unlocked = merge_fetched_list(&mut game, &fetched);
            GameUpdate {
                game: game.clone(),
                newly_unlocked,
                source: UpdateSource::Poll,
            }
        };
        let newly_unlocked = update.newly_unlocked.clone();
        let _ = self.updates.send(update);
        Ok(newly_unlocked)
    }

    /// Check every game that has a strategy. Returns the number of new unlocks.
    pub async fn run_cycle(&self) -> usize {
        let mut candidates = Vec::new();
        for game in self.library.games() {
            let method = game.lock().await.method;
            if self.strategies.contains_key(&method) {
                candidates.push(game);
            }
        }
        debug!("Reconciling {} game(s)", candidates.len());

        let unlocked: usize = stream::iter(candidates)
            .map(|game| async move {
                match self.check_for_new_achievements(&game).await {
                    Ok(newly_unlocked) => newly_unlocked.len(),
                    Err(e) => {
                        let app_id = game.lock().await.app_id;
                        warn!("Achievement check failed for app {}: {}", app_id, e);
                        0
                    }
                }
            })
            .buffer_unordered(MAX_CONCURRENT_CHECKS)
            .fold(0, |total, n| async move { total + n })
            .await;

        if unlocked > 0 {
            info!("Reconciliation found {} new achievement(s)", unlocked);
        }
        unlocked
    }

    /// Run a cycle every interval until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Polling every {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.run_cycle() => {}
                        }
                    }
                }
            }
            debug!("Reconciliation stopped");
        })
    }
}
