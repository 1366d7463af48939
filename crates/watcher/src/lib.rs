//! Overachiever Watcher
//!
//! Keeps a game library's achievement state current from two sources:
//! - achievement status files written by other programs (file watching)
//! - the Steam Web API (periodic reconciliation)
//!
//! Both paths end in a [`GameUpdate`](overachiever_core::GameUpdate) on one
//! channel; the binary persists those to SQLite.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod library;
pub mod local_cache;
pub mod reader;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod scrape;
pub mod steam_api;
