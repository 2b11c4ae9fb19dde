//! # Danmaku Gateway Core
//!
//! Shared data types, error handling, configuration, and text utilities
//! used across the danmaku aggregation and serving platform.
//!
//! ## Modules
//!
//! - `error`: Unified error kinds and the crate-wide `Result` alias
//! - `models`: Entity types (Anime, AnimeSource, Episode, Comment, ...)
//! - `episode_id`: The 14-digit virtual/real episode id codec
//! - `text`: Filename parsing, range compression, comment formatting
//! - `config`: The DB-backed `ConfigStore` with cached reads

pub mod config;
pub mod episode_id;
pub mod error;
pub mod models;
pub mod text;

pub use error::GatewayError;
pub use episode_id::EpisodeIdParts;

/// Result type alias for danmaku-gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
