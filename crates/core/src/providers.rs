//! Collaborator contracts for game metadata and achievement lists
//!
//! Implementations return `Ok(None)` when they have nothing for an appId and
//! `Err` when the source itself failed. Callers treat both as "unavailable".

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Achievement, Game};

/// First-party platform web API
#[async_trait]
pub trait AuthoritativeApiClient: Send + Sync {
    /// Configured and usable right now
    fn is_ready(&self) -> bool;

    /// Game metadata and achievement definitions
    async fn get_game_details(&self, app_id: u64) -> Result<Option<Game>>;

    /// Current achievement list with the user's unlock state
    async fn get_achievements(&self, app_id: u64) -> Result<Option<Vec<Achievement>>>;
}

/// Public store/community page scraper
#[async_trait]
pub trait ScrapeClient: Send + Sync {
    async fn scrape_game(&self, app_id: u64) -> Result<Option<Game>>;
}

/// Bundled or offline achievement definitions
#[async_trait]
pub trait LocalCacheStore: Send + Sync {
    async fn try_read(&self, app_id: u64) -> Result<Option<Game>>;
}
