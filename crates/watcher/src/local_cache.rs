//! Bundled/offline achievement definitions stored as `<appId>.json`

use async_trait::async_trait;
use overachiever_core::{Game, LocalCacheStore, OverachieverError, Result};
use std::io;
use std::path::PathBuf;

pub struct JsonCacheStore {
    dir: PathBuf,
}

impl JsonCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, app_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", app_id))
    }
}

#[async_trait]
impl LocalCacheStore for JsonCacheStore {
    async fn try_read(&self, app_id: u64) -> Result<Option<Game>> {
        let path = self.path_for(app_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OverachieverError::io(path, e)),
        };

        let mut game: Game = serde_json::from_str(&content)?;
        if game.app_id != app_id {
            return Err(OverachieverError::InvalidData(format!(
                "{} describes app {}, expected {}",
                path.display(),
                game.app_id,
                app_id
            )));
        }
        for ach in game.achievements.iter_mut() {
            // Definitions only; unlock state comes from status files
            ach.unlocked = false;
            ach.unlock_time = None;
            ach.derive_difficulty();
        }
        Ok(Some(game))
    }
}
