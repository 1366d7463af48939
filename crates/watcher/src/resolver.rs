//! Game identity resolution through an ordered fallback chain
//!
//! Tiers, first success wins:
//! 1. Authoritative web API (when configured and ready)
//! 2. Local `<appId>.json` definitions
//! 3. Community page scrape
//! 4. Placeholder `Unknown Game <appId>`
//!
//! Every tier is bounded by a timeout and every failure means "try the next
//! tier". [`GameResolver::resolve`] cannot fail.

use chrono::Utc;
use overachiever_core::{
    AcquisitionMethod, AuthoritativeApiClient, Game, LocalCacheStore, Result, ScrapeClient,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Api,
    LocalCache,
    Scrape,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Api => "Steam API",
            Tier::LocalCache => "local cache",
            Tier::Scrape => "community scrape",
        })
    }
}

pub struct GameResolver {
    api: Option<Arc<dyn AuthoritativeApiClient>>,
    local_cache: Option<Arc<dyn LocalCacheStore>>,
    scraper: Option<Arc<dyn ScrapeClient>>,
    tier_timeout: Duration,
}

impl GameResolver {
    pub fn new(tier_timeout: Duration) -> Self {
        Self {
            api: None,
            local_cache: None,
            scraper: None,
            tier_timeout,
        }
    }

    pub fn with_api(mut self, api: Arc<dyn AuthoritativeApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_local_cache(mut self, store: Arc<dyn LocalCacheStore>) -> Self {
        self.local_cache = Some(store);
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn ScrapeClient>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    /// Best-effort game for an appId. Results are not cached here.
    pub async fn resolve(&self, app_id: u64) -> Game {
        if let Some(api) = self.api.as_ref().filter(|api| api.is_ready()) {
            if let Some(game) = self.attempt(Tier::Api, app_id, api.get_game_details(app_id)).await {
                return tagged(game, app_id);
            }
        }

        if let Some(store) = &self.local_cache {
            if let Some(game) = self.attempt(Tier::LocalCache, app_id, store.try_read(app_id)).await {
                return tagged(game, app_id);
            }
        }

        if let Some(scraper) = &self.scraper {
            if let Some(game) = self.attempt(Tier::Scrape, app_id, scraper.scrape_game(app_id)).await {
                return tagged(game, app_id);
            }
        }

        info!("No provider knows app {}, using placeholder", app_id);
        Game::placeholder(app_id)
    }

    async fn attempt<F>(&self, tier: Tier, app_id: u64, lookup: F) -> Option<Game>
    where
        F: Future<Output = Result<Option<Game>>>,
    {
        match tokio::time::timeout(self.tier_timeout, lookup).await {
            Ok(Ok(Some(game))) => {
                debug!("Resolved app {} as '{}' via {}", app_id, game.name, tier);
                Some(game)
            }
            Ok(Ok(None)) => {
                debug!("{} has nothing for app {}", tier, app_id);
                None
            }
            Ok(Err(e)) => {
                warn!("{} failed for app {}: {}", tier, app_id, e);
                None
            }
            Err(_) => {
                warn!("{} timed out for app {} after {:?}", tier, app_id, self.tier_timeout);
                None
            }
        }
    }
}

fn tagged(mut game: Game, app_id: u64) -> Game {
    game.app_id = app_id;
    game.method = AcquisitionMethod::EmulatorDetected;
    game.resolved_at = Utc::now();
    game
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use async_trait::async_trait;
    use overachiever_core::{Achievement, OverachieverError, Platform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub fn spacewar() -> Game {
        let mut game = Game::new(480, Platform::Steam, "Spacewar");
        game.achievements = vec![
            Achievement::new(1, "ACH_WIN_ONE_GAME", "Winner"),
            Achievement::new(2, "ACH_TRAVEL_FAR_SINGLE", "Orbiter"),
        ];
        game
    }

    /// Behaviour shared by the fake providers
    #[derive(Clone)]
    pub enum Reply {
        Game(Game),
        Nothing,
        Fail,
        Hang,
    }

    impl Reply {
        async fn play(&self) -> Result<Option<Game>> {
            match self {
                Reply::Game(game) => Ok(Some(game.clone())),
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(OverachieverError::Network("connection refused".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
            }
        }
    }

    pub struct FakeApi {
        pub ready: bool,
        pub details: Reply,
        pub achievements: std::sync::Mutex<Option<Vec<Achievement>>>,
        pub calls: AtomicUsize,
    }

    impl FakeApi {
        pub fn new(ready: bool, details: Reply) -> Self {
            Self {
                ready,
                details,
                achievements: std::sync::Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_achievements(&self, achievements: Vec<Achievement>) {
            *self.achievements.lock().unwrap() = Some(achievements);
        }
    }

    #[async_trait]
    impl AuthoritativeApiClient for FakeApi {
        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn get_game_details(&self, _app_id: u64) -> Result<Option<Game>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.details.play().await
        }

        async fn get_achievements(&self, _app_id: u64) -> Result<Option<Vec<Achievement>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.achievements.lock().unwrap().clone())
        }
    }

    pub struct FakeCache(pub Reply);

    #[async_trait]
    impl LocalCacheStore for FakeCache {
        async fn try_read(&self, _app_id: u64) -> Result<Option<Game>> {
            self.0.play().await
        }
    }

    pub struct FakeScraper(pub Reply);

    #[async_trait]
    impl ScrapeClient for FakeScraper {
        async fn scrape_game(&self, _app_id: u64) -> Result<Option<Game>> {
            self.0.play().await
        }
    }
}
