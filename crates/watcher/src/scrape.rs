//! Best-effort scrape of the public Steam Community achievements page

use async_trait::async_trait;
use overachiever_core::{Achievement, Game, OverachieverError, Platform, Result, ScrapeClient};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use std::time::Duration;

use crate::steam_api::header_image_url;

const COMMUNITY_STATS_URL: &str = "https://steamcommunity.com/stats";

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<title>\s*Steam Community\s*::\s*(.+?)\s*::").expect("valid title regex"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<h3>(.*?)</h3>").expect("valid h3 regex"))
}

fn description_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<h5>(.*?)</h5>").expect("valid h5 regex"))
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"class="achievePercent">\s*([0-9]+(?:\.[0-9]+)?)\s*%"#).expect("valid percent regex"))
}

fn icon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<img\s+src="([^"]+)""#).expect("valid img regex"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(quot|#39|lt|gt|amp);").expect("valid entity regex"))
}

pub struct SteamCommunityScraper {
    client: reqwest::Client,
}

impl SteamCommunityScraper {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("overachiever-watcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OverachieverError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScrapeClient for SteamCommunityScraper {
    async fn scrape_game(&self, app_id: u64) -> Result<Option<Game>> {
        let url = format!("{}/{}/achievements/?l=english", COMMUNITY_STATS_URL, app_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OverachieverError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| OverachieverError::Network(e.to_string()))?;
        let html = response.text().await.map_err(|e| OverachieverError::Network(e.to_string()))?;
        Ok(parse_achievements_page(app_id, &html))
    }
}

/// Parse a community achievements page. Rows carry no apiName, so each
/// achievement gets its 1-based row position as `id`.
pub fn parse_achievements_page(app_id: u64, html: &str) -> Option<Game> {
    let name = title_re()
        .captures(html)
        .map(|caps| decode_entities(caps[1].trim()))
        .filter(|n| !n.is_empty());

    let achievements: Vec<Achievement> = html
        .split("class=\"achieveRow")
        .skip(1)
        .filter_map(parse_row)
        .enumerate()
        .map(|(i, mut ach)| {
            ach.id = i as u32 + 1;
            ach
        })
        .collect();

    if name.is_none() && achievements.is_empty() {
        return None;
    }

    let mut game = Game::new(
        app_id,
        Platform::Steam,
        name.unwrap_or_else(|| format!("Unknown Game {}", app_id)),
    );
    game.image = Some(header_image_url(app_id));
    game.achievements = achievements;
    Some(game)
}

fn parse_row(row: &str) -> Option<Achievement> {
    let name = decode_entities(heading_re().captures(row)?[1].trim());
    if name.is_empty() {
        return None;
    }

    let mut ach = Achievement::new(0, "", name);
    ach.description = description_re()
        .captures(row)
        .map(|caps| decode_entities(caps[1].trim()))
        .filter(|d| !d.is_empty());
    ach.icon = icon_re().captures(row).map(|caps| caps[1].to_string());
    ach.global_percent = percent_re().captures(row).and_then(|caps| caps[1].parse().ok());
    ach.derive_difficulty();
    Some(ach)
}

/// Decode the entities Steam emits in a single pass
fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &Captures| match &caps[1] {
            "quot" => "\"",
            "#39" => "'",
            "lt" => "<",
            "gt" => ">",
            _ => "&",
        })
        .into_owned()
}
