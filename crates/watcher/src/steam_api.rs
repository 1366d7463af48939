//! Steam Web API client: the authoritative metadata tier and the polling fetch

use async_trait::async_trait;
use overachiever_core::{
    AcquisitionMethod, Achievement, AuthoritativeApiClient, Game, OverachieverError, Platform, Result,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;

const API_OWNED_GAMES: &str = "https://api.steampowered.com/IPlayerService/GetOwnedGames/v1/";
const API_ACHIEVEMENTS: &str = "https://api.steampowered.com/ISteamUserStats/GetPlayerAchievements/v0001/";
const API_SCHEMA: &str = "https://api.steampowered.com/ISteamUserStats/GetSchemaForGame/v2/";
const API_GLOBAL_PERCENTAGES: &str =
    "https://api.steampowered.com/ISteamUserStats/GetGlobalAchievementPercentagesForApp/v0002/";

/// Game entry from GetOwnedGames
#[derive(Debug, Clone, Deserialize)]
pub struct OwnedGame {
    pub appid: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub img_icon_url: Option<String>,
}

/// Achievement definition from GetSchemaForGame
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaAchievement {
    pub name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub hidden: u8,
}

/// Player unlock state from GetPlayerAchievements
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerAchievement {
    pub apiname: String,
    pub achieved: u8,
    #[serde(default)]
    pub unlocktime: i64,
}

pub struct SteamApiClient {
    client: reqwest::Client,
    api_key: String,
    steam_id: Option<u64>,
}

impl SteamApiClient {
    pub fn new(api_key: impl Into<String>, steam_id: Option<u64>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OverachieverError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            steam_id,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.steam_web_api_key.clone(), config.steam_id_u64(), config.request_timeout())
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OverachieverError::Network(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| OverachieverError::SteamApi(e.to_string()))?;
        response.json().await.map_err(|e| OverachieverError::SteamApi(e.to_string()))
    }

    fn require_steam_id(&self) -> Result<u64> {
        self.steam_id
            .ok_or_else(|| OverachieverError::Config("steam_id is not configured".to_string()))
    }

    /// Owned games of the configured user, as Steam-method games without achievements
    pub async fn fetch_owned_games(&self) -> Result<Vec<Game>> {
        let steam_id = self.require_steam_id()?;
        let input = serde_json::json!({
            "steamid": steam_id,
            "include_appinfo": 1,
            "include_played_free_games": 1
        });

        let url = format!(
            "{}?key={}&input_json={}&format=json",
            API_OWNED_GAMES,
            self.api_key,
            urlencoding::encode(&input.to_string())
        );

        let body = self.get_json(&url).await?;
        Ok(parse_owned_games(&body).into_iter().map(owned_game_to_game).collect())
    }

    pub async fn fetch_achievement_schema(&self, app_id: u64) -> Result<Option<(String, Vec<SchemaAchievement>)>> {
        let url = format!("{}?appid={}&key={}&format=json", API_SCHEMA, app_id, self.api_key);
        let body = self.get_json(&url).await?;
        Ok(parse_schema(&body))
    }

    pub async fn fetch_player_achievements(&self, app_id: u64) -> Result<Option<Vec<PlayerAchievement>>> {
        let steam_id = self.require_steam_id()?;
        let url = format!(
            "{}?appid={}&key={}&steamid={}&format=json",
            API_ACHIEVEMENTS, app_id, self.api_key, steam_id
        );
        let body = self.get_json(&url).await?;
        Ok(parse_player_achievements(&body))
    }

    pub async fn fetch_global_percentages(&self, app_id: u64) -> Result<HashMap<String, f32>> {
        let url = format!("{}?gameid={}&format=json", API_GLOBAL_PERCENTAGES, app_id);
        let body = self.get_json(&url).await?;
        Ok(parse_global_percentages(&body))
    }
}

#[async_trait]
impl AuthoritativeApiClient for SteamApiClient {
    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_game_details(&self, app_id: u64) -> Result<Option<Game>> {
        let (schema, percents) = tokio::join!(
            self.fetch_achievement_schema(app_id),
            self.fetch_global_percentages(app_id)
        );
        let Some((name, schema)) = schema? else {
            return Ok(None);
        };
        // Rarity is optional decoration
        let percents = percents.unwrap_or_default();

        let mut game = Game::new(app_id, Platform::Steam, name);
        game.image = Some(header_image_url(app_id));
        game.achievements = schema_to_achievements(&schema, &percents);
        Ok(Some(game))
    }

    async fn get_achievements(&self, app_id: u64) -> Result<Option<Vec<Achievement>>> {
        let (player, schema, percents) = tokio::join!(
            self.fetch_player_achievements(app_id),
            self.fetch_achievement_schema(app_id),
            self.fetch_global_percentages(app_id)
        );
        let Some(player) = player? else {
            return Ok(None);
        };
        let schema = schema.ok().flatten().map(|(_, s)| s).unwrap_or_default();
        let percents = percents.unwrap_or_default();
        Ok(Some(player_to_achievements(&player, &schema, &percents)))
    }
}

// ============================================================================
// Response parsing
// ============================================================================

pub fn parse_owned_games(body: &Value) -> Vec<OwnedGame> {
    body["response"]["games"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|g| serde_json::from_value(g.clone()).ok()).collect())
        .unwrap_or_default()
}

/// `(gameName, achievements)`; `None` when the app has no schema at all
pub fn parse_schema(body: &Value) -> Option<(String, Vec<SchemaAchievement>)> {
    let game = body.get("game")?;
    let name = game["gameName"].as_str().unwrap_or_default().to_string();
    let achievements: Vec<SchemaAchievement> = game["availableGameStats"]["achievements"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|a| serde_json::from_value(a.clone()).ok()).collect())
        .unwrap_or_default();
    if name.is_empty() && achievements.is_empty() {
        return None;
    }
    Some((name, achievements))
}

/// `None` when Steam reports the request unsuccessful (private profile,
/// unknown app)
pub fn parse_player_achievements(body: &Value) -> Option<Vec<PlayerAchievement>> {
    let stats = body.get("playerstats")?;
    if stats["success"].as_bool() == Some(false) {
        return None;
    }
    Some(
        stats["achievements"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|a| serde_json::from_value(a.clone()).ok()).collect())
            .unwrap_or_default(),
    )
}

/// Percent values come back either as numbers or as numeric strings
pub fn parse_global_percentages(body: &Value) -> HashMap<String, f32> {
    body["achievementpercentages"]["achievements"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    let name = a["name"].as_str()?;
                    let percent = a["percent"]
                        .as_f64()
                        .or_else(|| a["percent"].as_str().and_then(|s| s.parse().ok()))?;
                    Some((name.to_string(), percent as f32))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn owned_game_to_game(owned: OwnedGame) -> Game {
    let mut game = Game::new(owned.appid, Platform::Steam, owned.name);
    game.method = AcquisitionMethod::Steam;
    game.image = owned
        .img_icon_url
        .filter(|hash| !hash.is_empty())
        .map(|hash| game_icon_url(owned.appid, &hash));
    game
}

pub fn schema_to_achievements(schema: &[SchemaAchievement], percents: &HashMap<String, f32>) -> Vec<Achievement> {
    schema
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut ach = Achievement::new(i as u32 + 1, s.name.clone(), display_name(s));
            ach.description = s.description.clone().filter(|d| !d.is_empty());
            ach.icon = s.icon.clone();
            ach.hidden = s.hidden != 0;
            ach.global_percent = percents.get(&s.name).copied();
            ach.derive_difficulty();
            ach
        })
        .collect()
}

/// Player state decorated with schema names; achievements missing from the
/// schema keep their apiname as display name
pub fn player_to_achievements(
    player: &[PlayerAchievement],
    schema: &[SchemaAchievement],
    percents: &HashMap<String, f32>,
) -> Vec<Achievement> {
    let by_name: HashMap<&str, &SchemaAchievement> = schema.iter().map(|s| (s.name.as_str(), s)).collect();

    player
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut ach = match by_name.get(p.apiname.as_str()) {
                Some(s) => {
                    let mut ach = Achievement::new(i as u32 + 1, p.apiname.clone(), display_name(s));
                    ach.description = s.description.clone().filter(|d| !d.is_empty());
                    ach.icon = s.icon.clone();
                    ach.hidden = s.hidden != 0;
                    ach
                }
                None => Achievement::new(i as u32 + 1, p.apiname.clone(), p.apiname.clone()),
            };
            if p.achieved != 0 {
                ach.unlock(p.unlocktime);
            }
            ach.global_percent = percents.get(&p.apiname).copied();
            ach.derive_difficulty();
            ach
        })
        .collect()
}

fn display_name(s: &SchemaAchievement) -> String {
    if s.display_name.is_empty() {
        s.name.clone()
    } else {
        s.display_name.clone()
    }
}

/// Game icons are at: media.steampowered.com/steamcommunity/public/images/apps/{appid}/{hash}.jpg
pub fn game_icon_url(appid: u64, icon_hash: &str) -> String {
    format!("https://media.steampowered.com/steamcommunity/public/images/apps/{}/{}.jpg", appid, icon_hash)
}

pub fn header_image_url(appid: u64) -> String {
    format!("https://cdn.akamai.steamstatic.com/steam/apps/{}/header.jpg", appid)
}
