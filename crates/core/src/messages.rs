//! Messages emitted to collaborators when game data is found or updated

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::*;

/// What produced an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateSource {
    /// An achievement status file was created, changed, renamed, or found
    /// by the initial directory scan
    File { path: PathBuf },

    /// A reconciliation poll against the authoritative API
    Poll,
}

/// "Game data found/updated": a snapshot of the game after a full merge,
/// plus the achievements that became unlocked in that merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameUpdate {
    pub game: Game,
    pub newly_unlocked: Vec<Achievement>,
    pub source: UpdateSource,
}

impl GameUpdate {
    pub fn has_unlocks(&self) -> bool {
        !self.newly_unlocked.is_empty()
    }
}
