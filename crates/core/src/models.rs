//! Shared data models for achievement ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Platform a game's catalog identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Platform {
    #[default]
    Steam,
    #[serde(rename = "PC")]
    Pc,
}

impl Platform {
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Steam => "Steam",
            Platform::Pc => "PC",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "PC" => Platform::Pc,
            _ => Platform::Steam,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How ownership or emulation of a game was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMethod {
    /// Owned on Steam, discovered through the owned-games sync
    Steam,
    /// Discovered from an achievement file and resolved through a provider
    EmulatorDetected,
    /// Discovered from an achievement file, no provider knew the appId
    #[default]
    Emulator,
}

impl AcquisitionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AcquisitionMethod::Steam => "steam",
            AcquisitionMethod::EmulatorDetected => "emulator-detected",
            AcquisitionMethod::Emulator => "emulator",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "steam" => AcquisitionMethod::Steam,
            "emulator-detected" => AcquisitionMethod::EmulatorDetected,
            _ => AcquisitionMethod::Emulator,
        }
    }
}

/// Identity of a game within a user's library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameKey {
    pub app_id: u64,
    pub platform: Platform,
}

/// Bounded progress towards a stat-based achievement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub max: u32,
}

impl Progress {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current: current.min(max), max }
    }
}

/// An achievement of a game, either definition-only or with player state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    /// Ordinal position, the fallback identity when `api_name` is empty
    pub id: u32,
    pub api_name: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlock_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<Progress>,
    /// Share of all players that unlocked it, 0-100
    #[serde(default)]
    pub global_percent: Option<f32>,
    /// 1 (common) to 5 (rare)
    #[serde(default)]
    pub difficulty: Option<u8>,
}

impl Achievement {
    pub fn new(id: u32, api_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            api_name: api_name.into(),
            name: name.into(),
            description: None,
            icon: None,
            hidden: false,
            unlocked: false,
            unlock_time: None,
            progress: None,
            global_percent: None,
            difficulty: None,
        }
    }

    /// Mark as unlocked. Unlock is one-way; calling this on an unlocked
    /// achievement keeps the original time.
    pub fn unlock(&mut self, epoch_seconds: i64) {
        if self.unlocked {
            return;
        }
        self.unlocked = true;
        self.unlock_time = unlock_time_from_epoch(epoch_seconds);
    }

    /// Fill `difficulty` from `global_percent` unless one was supplied
    pub fn derive_difficulty(&mut self) {
        if self.difficulty.is_none() {
            self.difficulty = self.global_percent.map(difficulty_from_rarity);
        }
    }
}

/// Unlock state for one achievement as read from a status file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockStatus {
    pub unlocked: bool,
    pub unlock_time: i64,
}

/// `apiName -> unlock state`, the normalized output of every status parser
pub type UnlockStatusMap = HashMap<String, UnlockStatus>;

/// A game with its achievements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub app_id: u64,
    pub platform: Platform,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: AcquisitionMethod,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
    #[serde(default)]
    pub tracked_path: Option<PathBuf>,
    #[serde(default = "Utc::now")]
    pub resolved_at: DateTime<Utc>,
}

impl Game {
    pub fn new(app_id: u64, platform: Platform, name: impl Into<String>) -> Self {
        Self {
            app_id,
            platform,
            name: name.into(),
            image: None,
            description: String::new(),
            method: AcquisitionMethod::default(),
            achievements: Vec::new(),
            tracked_path: None,
            resolved_at: Utc::now(),
        }
    }

    /// Stand-in for a game no provider could describe
    pub fn placeholder(app_id: u64) -> Self {
        let mut game = Game::new(app_id, Platform::Pc, format!("Unknown Game {}", app_id));
        game.method = AcquisitionMethod::Emulator;
        game
    }

    pub fn key(&self) -> GameKey {
        GameKey { app_id: self.app_id, platform: self.platform }
    }

    pub fn is_placeholder(&self) -> bool {
        self.method == AcquisitionMethod::Emulator && self.achievements.is_empty()
    }

    pub fn unlocked_count(&self) -> usize {
        self.achievements.iter().filter(|a| a.unlocked).count()
    }
}

/// An unlock from the persisted log, newest first in queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentUnlock {
    pub app_id: u64,
    pub game_name: String,
    pub achievement_name: String,
    pub unlock_time: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
    /// `"file"` or `"poll"`
    pub source: String,
}

/// Map a global unlock percentage to a 1-5 difficulty score
pub fn difficulty_from_rarity(percent: f32) -> u8 {
    match percent {
        p if p >= 50.0 => 1,
        p if p >= 20.0 => 2,
        p if p >= 10.0 => 3,
        p if p >= 5.0 => 4,
        _ => 5,
    }
}

/// Epoch seconds to a timestamp; zero or out-of-range values mean "unknown"
pub fn unlock_time_from_epoch(epoch_seconds: i64) -> Option<DateTime<Utc>> {
    if epoch_seconds <= 0 {
        return None;
    }
    DateTime::from_timestamp(epoch_seconds, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_has_expected_shape() {
        let game = Game::placeholder(999999);
        assert_eq!(game.name, "Unknown Game 999999");
        assert_eq!(game.platform, Platform::Pc);
        assert_eq!(game.method, AcquisitionMethod::Emulator);
        assert!(game.achievements.is_empty());
        assert!(game.is_placeholder());
    }

    #[test]
    fn unlock_keeps_first_time() {
        let mut ach = Achievement::new(1, "ach_a", "A");
        ach.unlock(1000);
        ach.unlock(2000);
        assert!(ach.unlocked);
        assert_eq!(ach.unlock_time.map(|t| t.timestamp()), Some(1000));
    }

    #[test]
    fn unlock_without_time_leaves_time_empty() {
        let mut ach = Achievement::new(1, "ach_a", "A");
        ach.unlock(0);
        assert!(ach.unlocked);
        assert!(ach.unlock_time.is_none());
    }

    #[test]
    fn difficulty_buckets() {
        assert_eq!(difficulty_from_rarity(75.0), 1);
        assert_eq!(difficulty_from_rarity(20.0), 2);
        assert_eq!(difficulty_from_rarity(12.5), 3);
        assert_eq!(difficulty_from_rarity(5.0), 4);
        assert_eq!(difficulty_from_rarity(0.3), 5);
    }

    #[test]
    fn explicit_difficulty_is_not_overwritten() {
        let mut ach = Achievement::new(1, "x", "X");
        ach.global_percent = Some(90.0);
        ach.difficulty = Some(4);
        ach.derive_difficulty();
        assert_eq!(ach.difficulty, Some(4));

        let mut ach = Achievement::new(2, "y", "Y");
        ach.global_percent = Some(1.0);
        ach.derive_difficulty();
        assert_eq!(ach.difficulty, Some(5));
    }

    #[test]
    fn progress_is_clamped() {
        let p = Progress::new(12, 10);
        assert_eq!(p, Progress { current: 10, max: 10 });
    }

    #[test]
    fn game_deserializes_with_defaults() {
        let game: Game = serde_json::from_str(
            r#"{"app_id": 480, "platform": "Steam", "name": "Spacewar",
                "achievements": [{"id": 1, "api_name": "ACH_WIN", "name": "Winner"}]}"#,
        )
        .unwrap();
        assert_eq!(game.method, AcquisitionMethod::Emulator);
        assert_eq!(game.achievements.len(), 1);
        assert!(!game.achievements[0].unlocked);
        assert_eq!(game.unlocked_count(), 0);
    }
}
