//! Core shared types and logic for Overachiever achievement ingestion
//!
//! This crate contains:
//! - Data models for games, achievements, and unlock state
//! - The update message emitted to collaborators
//! - Error types
//! - File classification, status file parsers, and unlock merging
//! - Collaborator traits for metadata providers (with `async` feature)

pub mod classify;
pub mod error;
pub mod merge;
pub mod messages;
pub mod models;
pub mod status;

#[cfg(feature = "async")]
pub mod providers;

pub use error::*;
pub use messages::*;
pub use models::*;

#[cfg(feature = "async")]
pub use providers::*;
