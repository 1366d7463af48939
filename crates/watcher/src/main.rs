//! Overachiever Watcher daemon
//!
//! Watches the configured directories and files, polls Steam for owned
//! games, and stores every update in the local database until Ctrl+C.

use overachiever_core::{AcquisitionMethod, AuthoritativeApiClient, GameUpdate, OverachieverError, Result};
use overachiever_watcher::config::Config;
use overachiever_watcher::coordinator::IngestionCoordinator;
use overachiever_watcher::db;
use overachiever_watcher::library::GameLibrary;
use overachiever_watcher::local_cache::JsonCacheStore;
use overachiever_watcher::resolver::GameResolver;
use overachiever_watcher::scheduler::{ReconciliationScheduler, SteamApiCheck};
use overachiever_watcher::scrape::SteamCommunityScraper;
use overachiever_watcher::steam_api::SteamApiClient;
use rusqlite::Connection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overachiever_watcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load();
    let steam = Arc::new(SteamApiClient::from_config(&config)?);
    if !steam.is_ready() {
        warn!("No Steam Web API key configured - API lookups and polling are disabled");
    }

    // Resolution tiers
    let mut resolver = GameResolver::new(config.request_timeout())
        .with_local_cache(Arc::new(JsonCacheStore::new(&config.cache_dir)));
    if steam.is_ready() {
        resolver = resolver.with_api(steam.clone());
    }
    if config.scrape_enabled {
        resolver = resolver.with_scraper(Arc::new(SteamCommunityScraper::new(config.request_timeout())?));
    }
    let library = Arc::new(GameLibrary::new(Arc::new(resolver), config.placeholder_retry()));

    // Stored library
    let conn = db::open_connection(&config.database_path).map_err(|e| OverachieverError::Database(e.to_string()))?;
    let stored = db::load_games(&conn).map_err(|e| OverachieverError::Database(e.to_string()))?;
    info!("Loaded {} game(s) from {}", stored.len(), config.database_path.display());
    for game in stored {
        library.insert(game);
    }

    if config.has_steam_credentials() {
        match steam.fetch_owned_games().await {
            Ok(owned) => {
                info!("Steam reports {} owned game(s)", owned.len());
                for game in owned {
                    library.insert(game);
                }
            }
            Err(e) => warn!("Failed to fetch owned games: {}", e),
        }
    }

    let (coordinator, updates) = IngestionCoordinator::new(library.clone(), config.retry_policy());
    let persist = tokio::task::spawn_blocking(move || persist_updates(conn, updates));

    coordinator.start_watching(&config.watch_dirs).await?;

    for tracked in &config.tracked_files {
        let game = library.get_or_resolve(tracked.app_id).await;
        if let Err(e) = coordinator.start_watching_single_file(game, &tracked.path).await {
            warn!("Cannot track {}: {}", tracked.path.display(), e);
        }
    }
    // Files bound in an earlier run
    for game in library.games() {
        let path = game.lock().await.tracked_path.clone();
        if let Some(path) = path.filter(|p| !coordinator.registry().is_tracked(p)) {
            if let Err(e) = coordinator.start_watching_single_file(game, &path).await {
                warn!("Cannot track {}: {}", path.display(), e);
            }
        }
    }

    let cancel = CancellationToken::new();
    let poller = if config.has_steam_credentials() {
        let scheduler = ReconciliationScheduler::new(
            library.clone(),
            coordinator.update_sender(),
            config.poll_interval(),
            config.request_timeout(),
        )
        .with_strategy(AcquisitionMethod::Steam, Arc::new(SteamApiCheck::new(steam.clone())));
        Some(Arc::new(scheduler).spawn(cancel.clone()))
    } else {
        info!("Steam credentials missing, reconciliation disabled");
        None
    };

    info!("Watching {} game(s). Press Ctrl+C to stop.", library.len());
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Shutting down");
    cancel.cancel();
    coordinator.stop_watching().await;
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    // Closes the updates channel once the last sender is gone
    drop(coordinator);
    let _ = persist.await;
    Ok(())
}

fn persist_updates(mut conn: Connection, mut updates: tokio::sync::mpsc::UnboundedReceiver<GameUpdate>) {
    while let Some(update) = updates.blocking_recv() {
        for ach in &update.newly_unlocked {
            info!("Achievement unlocked: {} - {}", update.game.name, ach.name);
        }
        if let Err(e) = db::upsert_game(&mut conn, &update.game) {
            error!("Failed to save {}: {}", update.game.name, e);
            continue;
        }
        if update.has_unlocks() {
            if let Err(e) = db::record_unlocks(&conn, &update.game, &update.newly_unlocked, &update.source) {
                error!("Failed to log unlocks for {}: {}", update.game.name, e);
            }
        }
    }
    info!("All updates saved");
}
