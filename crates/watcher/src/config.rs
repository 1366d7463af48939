//! Configuration management using config.toml

use overachiever_core::{OverachieverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH: &str = "config.toml";

/// A file explicitly bound to a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub app_id: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Steam Web API key (empty disables the API tier and polling)
    pub steam_web_api_key: String,

    /// SteamID64 of the user whose achievements are polled
    pub steam_id: String,

    /// Directories watched recursively for achievement files
    pub watch_dirs: Vec<PathBuf>,

    /// Files bound to a specific appId
    pub tracked_files: Vec<TrackedFile>,

    /// Directory holding `<appId>.json` achievement definitions
    pub cache_dir: PathBuf,

    /// SQLite database for the game library
    pub database_path: PathBuf,

    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub read_retries: u32,
    pub read_retry_delay_ms: u64,

    /// Placeholder games older than this are resolved again
    pub placeholder_retry_secs: u64,

    /// Fall back to scraping the community achievements page
    pub scrape_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steam_web_api_key: String::new(),
            steam_id: String::new(),
            watch_dirs: Vec::new(),
            tracked_files: Vec::new(),
            cache_dir: PathBuf::from("achievement_cache"),
            database_path: PathBuf::from("overachiever.db"),
            poll_interval_secs: 300,
            request_timeout_secs: 10,
            read_retries: 5,
            read_retry_delay_ms: 100,
            placeholder_retry_secs: 600,
            scrape_enabled: true,
        }
    }
}

impl Config {
    /// Load config from `config.toml`, falling back to defaults, then apply
    /// `STEAM_API_KEY` / `STEAM_ID` from the environment
    pub fn load() -> Self {
        let mut config = if Path::new(CONFIG_PATH).exists() {
            match Self::load_from(Path::new(CONFIG_PATH)) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{}; using defaults", e);
                    Config::default()
                }
            }
        } else {
            let config = Config::default();
            let _ = config.save(Path::new(CONFIG_PATH)); // Try to create the file
            config
        };
        config.apply_env();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| OverachieverError::io(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OverachieverError::Config(format!("Error parsing config.toml: {}", e)))
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| OverachieverError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| OverachieverError::io(path, e))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("STEAM_API_KEY") {
            self.steam_web_api_key = key;
        }
        if let Ok(id) = std::env::var("STEAM_ID") {
            self.steam_id = id;
        }
    }

    /// Check if Steam Web API credentials are present
    pub fn has_steam_credentials(&self) -> bool {
        !self.steam_web_api_key.is_empty() && self.steam_id_u64().is_some()
    }

    /// Get steam_id as u64 for API calls
    pub fn steam_id_u64(&self) -> Option<u64> {
        self.steam_id.trim().parse().ok()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn placeholder_retry(&self) -> Duration {
        Duration::from_secs(self.placeholder_retry_secs)
    }

    pub fn retry_policy(&self) -> crate::reader::RetryPolicy {
        crate::reader::RetryPolicy {
            max_retries: self.read_retries.max(1),
            delay: Duration::from_millis(self.read_retry_delay_ms),
        }
    }
}
