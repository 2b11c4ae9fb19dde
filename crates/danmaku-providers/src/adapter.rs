//! The scraper adapter contract (C4). Concrete per-site adapters
//! (HTML/JSON scraping against specific providers) are out of scope —
//! this module only specifies the interface the registry and the
//! fallback engine depend on.

use std::collections::HashMap;

use async_trait::async_trait;
use danmaku_core::Result;
use serde::{Deserialize, Serialize};

/// The content type a search/episode result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    TvSeries,
    Movie,
    Ova,
    Other,
}

/// The query context passed alongside a free-text keyword: a title
/// already resolved to a specific season/episode, when known.
#[derive(Debug, Clone, Default)]
pub struct EpisodeQuery {
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// One adapter's search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSearchInfo {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub season: i32,
    pub year: Option<i32>,
    pub episode_count: Option<i32>,
    pub image_url: Option<String>,
}

/// One episode entry from an adapter's episode list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEpisodeInfo {
    pub episode_index: i32,
    pub title: String,
    pub episode_id: String,
    pub url: Option<String>,
}

/// A single unparsed comment as handed back by an adapter, before it is
/// normalized into a [`danmaku_core::models::Comment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub time_sec: f64,
    pub mode: i32,
    pub color: i32,
    pub text: String,
}

/// A descriptor exchanged with the settings UI and the registry; every
/// adapter publishes one of these alongside its behavior.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub provider_name: String,
    pub handled_domains: Vec<String>,
    pub rate_limit_quota: Option<u64>,
    pub configurable_fields: HashMap<String, String>,
    pub test_url: Option<String>,
    pub referer: Option<String>,
    pub is_loggable: bool,
}

/// Progress updates `(percent, description)` reported back to the
/// Task Manager while a long-running adapter call is in flight.
pub type ProgressCallback = std::sync::Arc<dyn Fn(u8, &str) + Send + Sync>;

/// The behavior every provider-specific scraper adapter implements.
#[async_trait]
pub trait ScraperAdapter: Send + Sync {
    fn descriptor(&self) -> &AdapterDescriptor;

    async fn search(
        &self,
        keyword: &str,
        episode_info: Option<&EpisodeQuery>,
    ) -> Result<Vec<ProviderSearchInfo>>;

    async fn get_episodes(
        &self,
        media_id: &str,
        db_media_type: Option<MediaKind>,
    ) -> Result<Vec<ProviderEpisodeInfo>>;

    async fn get_comments(
        &self,
        episode_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<RawComment>>;

    fn format_episode_id_for_comments(&self, provider_episode_id: &str) -> String {
        provider_episode_id.to_string()
    }

    fn get_id_from_url(&self, url: &str) -> Option<String>;

    async fn execute_action(&self, _action_name: &str, _payload: serde_json::Value) -> Result<serde_json::Value> {
        Err(danmaku_core::GatewayError::InputInvalid(format!(
            "adapter {} declares no actions",
            self.descriptor().provider_name
        )))
    }
}
