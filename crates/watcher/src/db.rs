//! SQLite persistence for the game library and the unlock log

use chrono::{DateTime, Utc};
use overachiever_core::{
    AcquisitionMethod, Achievement, Game, GameKey, Platform, Progress, RecentUnlock, UpdateSource,
};
use rusqlite::{params, Connection, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_tables(&conn)?;
    Ok(conn)
}

pub fn init_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS games (
            app_id INTEGER NOT NULL,
            platform TEXT NOT NULL,
            name TEXT NOT NULL,
            image TEXT,
            description TEXT NOT NULL DEFAULT '',
            method TEXT NOT NULL,
            tracked_path TEXT,
            resolved_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (app_id, platform)
        )",
        [],
    )?;

    // Position keeps the game's order and duplicates of scraped names apart
    conn.execute(
        "CREATE TABLE IF NOT EXISTS achievements (
            app_id INTEGER NOT NULL,
            platform TEXT NOT NULL,
            position INTEGER NOT NULL,
            id INTEGER NOT NULL,
            api_name TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            icon TEXT,
            hidden INTEGER NOT NULL DEFAULT 0,
            unlocked INTEGER NOT NULL DEFAULT 0,
            unlock_time INTEGER,
            progress_current INTEGER,
            progress_max INTEGER,
            global_percent REAL,
            difficulty INTEGER,
            PRIMARY KEY (app_id, platform, position)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS unlock_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id INTEGER NOT NULL,
            platform TEXT NOT NULL,
            game_name TEXT NOT NULL,
            api_name TEXT NOT NULL,
            achievement_name TEXT NOT NULL,
            unlock_time INTEGER,
            source TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unlock_log_recorded ON unlock_log(recorded_at)",
        [],
    )?;

    Ok(())
}

/// Store a game and replace its achievement rows.
///
/// The library holds one game per appId, so a resolved game also removes
/// rows stored for the same appId under another platform (the placeholder
/// it was upgraded from).
pub fn upsert_game(conn: &mut Connection, game: &Game) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let key = game.key();
    let platform = key.platform.label();
    let tx = conn.transaction()?;

    if !game.is_placeholder() {
        tx.execute(
            "DELETE FROM achievements WHERE app_id = ?1 AND platform != ?2",
            params![key.app_id, platform],
        )?;
        tx.execute(
            "DELETE FROM games WHERE app_id = ?1 AND platform != ?2",
            params![key.app_id, platform],
        )?;
    }

    tx.execute(
        "INSERT INTO games (app_id, platform, name, image, description, method, tracked_path, resolved_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(app_id, platform) DO UPDATE SET
         name = excluded.name,
         image = excluded.image,
         description = excluded.description,
         method = excluded.method,
         tracked_path = excluded.tracked_path,
         resolved_at = excluded.resolved_at,
         updated_at = excluded.updated_at",
        params![
            key.app_id,
            platform,
            &game.name,
            &game.image,
            &game.description,
            game.method.label(),
            game.tracked_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            game.resolved_at.to_rfc3339(),
            &now,
        ],
    )?;

    tx.execute(
        "DELETE FROM achievements WHERE app_id = ?1 AND platform = ?2",
        params![key.app_id, platform],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO achievements (app_id, platform, position, id, api_name, name, description, icon, hidden,
             unlocked, unlock_time, progress_current, progress_max, global_percent, difficulty)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        for (position, ach) in game.achievements.iter().enumerate() {
            stmt.execute(params![
                key.app_id,
                platform,
                position as i64,
                ach.id,
                &ach.api_name,
                &ach.name,
                &ach.description,
                &ach.icon,
                ach.hidden,
                ach.unlocked,
                ach.unlock_time.map(|t| t.timestamp()),
                ach.progress.map(|p| p.current),
                ach.progress.map(|p| p.max),
                ach.global_percent.map(f64::from),
                ach.difficulty,
            ])?;
        }
    }

    tx.commit()
}

/// Every stored game with its achievements, ordered by name with
/// placeholders last
pub fn load_games(conn: &Connection) -> Result<Vec<Game>> {
    let mut stmt = conn.prepare(
        "SELECT app_id, platform, name, image, description, method, tracked_path, resolved_at
         FROM games ORDER BY (method = 'emulator'), name",
    )?;
    let mut games = stmt
        .query_map([], |row| {
            let platform: String = row.get(1)?;
            let method: String = row.get(5)?;
            let tracked_path: Option<String> = row.get(6)?;
            let resolved_at: String = row.get(7)?;

            let mut game = Game::new(row.get(0)?, Platform::from_label(&platform), row.get::<_, String>(2)?);
            game.image = row.get(3)?;
            game.description = row.get(4)?;
            game.method = AcquisitionMethod::from_label(&method);
            game.tracked_path = tracked_path.map(PathBuf::from);
            game.resolved_at = parse_timestamp(&resolved_at);
            Ok(game)
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT app_id, platform, id, api_name, name, description, icon, hidden, unlocked, unlock_time,
         progress_current, progress_max, global_percent, difficulty
         FROM achievements ORDER BY app_id, platform, position",
    )?;
    let mut achievements: HashMap<GameKey, Vec<Achievement>> = HashMap::new();
    let rows = stmt.query_map([], |row| {
        let platform: String = row.get(1)?;
        let key = GameKey {
            app_id: row.get(0)?,
            platform: Platform::from_label(&platform),
        };
        let mut ach = Achievement::new(row.get(2)?, row.get::<_, String>(3)?, row.get::<_, String>(4)?);
        ach.description = row.get(5)?;
        ach.icon = row.get(6)?;
        ach.hidden = row.get(7)?;
        ach.unlocked = row.get(8)?;
        ach.unlock_time = row
            .get::<_, Option<i64>>(9)?
            .and_then(|t| DateTime::from_timestamp(t, 0));
        let current: Option<u32> = row.get(10)?;
        let max: Option<u32> = row.get(11)?;
        ach.progress = current.zip(max).map(|(current, max)| Progress::new(current, max));
        ach.global_percent = row.get::<_, Option<f64>>(12)?.map(|p| p as f32);
        ach.difficulty = row.get(13)?;
        Ok((key, ach))
    })?;
    for row in rows {
        let (key, ach) = row?;
        achievements.entry(key).or_default().push(ach);
    }

    for game in games.iter_mut() {
        if let Some(list) = achievements.remove(&game.key()) {
            game.achievements = list;
        }
    }
    Ok(games)
}

/// Append newly unlocked achievements to the unlock log
pub fn record_unlocks(conn: &Connection, game: &Game, unlocked: &[Achievement], source: &UpdateSource) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let source = match source {
        UpdateSource::File { .. } => "file",
        UpdateSource::Poll => "poll",
    };
    for ach in unlocked {
        conn.execute(
            "INSERT INTO unlock_log (app_id, platform, game_name, api_name, achievement_name, unlock_time, source, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                game.app_id,
                game.platform.label(),
                &game.name,
                &ach.api_name,
                &ach.name,
                ach.unlock_time.map(|t| t.timestamp()),
                source,
                &now,
            ],
        )?;
    }
    Ok(())
}

pub fn recent_unlocks(conn: &Connection, limit: i32) -> Result<Vec<RecentUnlock>> {
    let mut stmt = conn.prepare(
        "SELECT app_id, game_name, achievement_name, unlock_time, recorded_at, source
         FROM unlock_log
         ORDER BY recorded_at DESC, id DESC
         LIMIT ?1",
    )?;

    let unlocks = stmt
        .query_map(params![limit], |row| {
            let recorded_at: String = row.get(4)?;
            Ok(RecentUnlock {
                app_id: row.get(0)?,
                game_name: row.get(1)?,
                achievement_name: row.get(2)?,
                unlock_time: row
                    .get::<_, Option<i64>>(3)?
                    .and_then(|t| DateTime::from_timestamp(t, 0)),
                recorded_at: parse_timestamp(&recorded_at),
                source: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(unlocks)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_tables(&conn).unwrap();
        conn
    }

    fn sample() -> Game {
        let mut game = Game::new(480, Platform::Steam, "Spacewar");
        game.method = AcquisitionMethod::Steam;
        game.tracked_path = Some(PathBuf::from("/saves/480/achievements.ini"));
        let mut won = Achievement::new(1, "ACH_WIN_ONE_GAME", "Winner");
        won.unlock(1_700_000_000);
        won.global_percent = Some(42.5);
        won.derive_difficulty();
        let mut travel = Achievement::new(2, "ACH_TRAVEL_FAR_SINGLE", "Orbiter");
        travel.progress = Some(Progress::new(3, 10));
        game.achievements = vec![won, travel];
        game
    }

    #[test]
    fn games_round_trip_through_the_database() {
        let mut conn = memory();
        let game = sample();
        upsert_game(&mut conn, &game).unwrap();

        let loaded = load_games(&conn).unwrap();
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.name, "Spacewar");
        assert_eq!(loaded.method, AcquisitionMethod::Steam);
        assert_eq!(loaded.tracked_path, game.tracked_path);
        assert_eq!(loaded.achievements.len(), 2);
        assert!(loaded.achievements[0].unlocked);
        assert_eq!(loaded.achievements[0].unlock_time, game.achievements[0].unlock_time);
        assert_eq!(loaded.achievements[0].difficulty, Some(2));
        assert_eq!(loaded.achievements[1].progress, Some(Progress::new(3, 10)));
    }

    #[test]
    fn upsert_replaces_achievements() {
        let mut conn = memory();
        let mut game = sample();
        upsert_game(&mut conn, &game).unwrap();

        game.achievements.truncate(1);
        game.name = "Spacewar!".into();
        upsert_game(&mut conn, &game).unwrap();

        let loaded = load_games(&conn).unwrap();
        assert_eq!(loaded[0].name, "Spacewar!");
        assert_eq!(loaded[0].achievements.len(), 1);
    }

    #[test]
    fn resolved_game_replaces_its_placeholder_row() {
        let mut conn = memory();
        upsert_game(&mut conn, &Game::placeholder(480)).unwrap();
        upsert_game(&mut conn, &sample()).unwrap();

        let loaded = load_games(&conn).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key(), GameKey { app_id: 480, platform: Platform::Steam });
        assert_eq!(loaded[0].achievements.len(), 2);
    }

    #[test]
    fn placeholder_does_not_replace_a_resolved_row() {
        let mut conn = memory();
        upsert_game(&mut conn, &sample()).unwrap();
        upsert_game(&mut conn, &Game::placeholder(480)).unwrap();

        let loaded = load_games(&conn).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Spacewar");
        assert!(loaded[1].is_placeholder());
    }

    #[tokio::test]
    async fn restart_restores_the_resolved_game() {
        let mut conn = memory();
        upsert_game(&mut conn, &Game::placeholder(480)).unwrap();

        let mut game = Game::new(480, Platform::Steam, "Zork Remastered");
        game.method = AcquisitionMethod::EmulatorDetected;
        let mut ach = Achievement::new(1, "ACH_A", "A");
        ach.unlock(1_700_000_000);
        game.achievements = vec![ach, Achievement::new(2, "ACH_B", "B")];
        upsert_game(&mut conn, &game).unwrap();

        let resolver = crate::resolver::GameResolver::new(std::time::Duration::from_millis(50));
        let library = crate::library::GameLibrary::new(std::sync::Arc::new(resolver), std::time::Duration::ZERO);
        for game in load_games(&conn).unwrap() {
            library.insert(game);
        }

        let held = library.get(480).unwrap();
        let held = held.lock().await;
        assert_eq!(held.name, "Zork Remastered");
        assert_eq!(held.unlocked_count(), 1);
        assert!(held.achievements[0].unlocked);
    }

    #[test]
    fn unlock_log_lists_newest_first() {
        let conn = memory();
        let game = sample();
        record_unlocks(&conn, &game, &game.achievements[..1], &UpdateSource::Poll).unwrap();
        let mut later = game.achievements[1].clone();
        later.unlock(1_700_000_500);
        record_unlocks(
            &conn,
            &game,
            &[later],
            &UpdateSource::File {
                path: "/saves/480/achievements.ini".into(),
            },
        )
        .unwrap();

        let recent = recent_unlocks(&conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].achievement_name, "Orbiter");
        assert_eq!(recent[0].source, "file");
        assert_eq!(recent[1].source, "poll");
        assert_eq!(recent_unlocks(&conn, 1).unwrap().len(), 1);
    }
}
