//! Virtual anime id minting and the cache bindings that make a
//! not-yet-materialized fallback result addressable by the external
//! protocol (§4.5.1). A virtual anime id is never reused while its
//! binding is still live in the cache; the counter only ever advances.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use danmaku_core::episode_id::{is_virtual_anime_id, VIRTUAL_ANIME_ID_BASE};
use danmaku_core::Result;
use danmaku_providers::{MediaKind, ProviderSearchInfo};
use serde::{Deserialize, Serialize};

use danmaku_cache::{prefixes, CacheStore, CacheStoreExt};

/// TTL for a single anime/episode binding.
pub const BINDING_TTL: Duration = Duration::from_secs(3 * 3600);
/// TTL for the "whole show" binding, kept alive longer so next-episode
/// inference keeps working across a playback session.
pub const WHOLE_SHOW_TTL: Duration = Duration::from_secs(10_800);

/// Everything needed to later materialize a fallback search hit into
/// real `Anime`/`AnimeSource` rows, bound under `fallback_search_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimeBinding {
    pub provider: String,
    pub media_id: String,
    pub title: String,
    pub kind: MediaKind,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub season: i32,
    /// The real anime id this virtual id will become once materialized.
    pub real_anime_id: i64,
}

/// Provider routing info bound under `fallback_episode_`, keyed by the
/// synthetic 14-digit episode id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeBinding {
    pub provider: String,
    pub media_id: String,
    pub provider_episode_id: Option<String>,
    pub episode_index: i32,
}

/// Monotonic, process-wide virtual anime id allocator. Starts at
/// [`VIRTUAL_ANIME_ID_BASE`] and only advances — a virtual id is never
/// reissued even after its cache binding expires, so a stale client
/// reference can never collide with a fresher session.
pub struct VirtualIdMinter {
    next: AtomicI64,
}

impl Default for VirtualIdMinter {
    fn default() -> Self {
        Self {
            next: AtomicI64::new(VIRTUAL_ANIME_ID_BASE),
        }
    }
}

impl VirtualIdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Bind a freshly-minted virtual anime id to its provider hit, under
/// `fallback_anime_<id>`.
pub async fn bind_anime<C: CacheStore>(
    cache: &C,
    virtual_anime_id: i64,
    hit: &ProviderSearchInfo,
    real_anime_id: i64,
) -> Result<()> {
    debug_assert!(is_virtual_anime_id(virtual_anime_id));
    let binding = AnimeBinding {
        provider: hit.provider.clone(),
        media_id: hit.media_id.clone(),
        title: hit.title.clone(),
        kind: hit.kind,
        year: hit.year,
        image_url: hit.image_url.clone(),
        season: hit.season,
        real_anime_id,
    };
    let key = format!("{}{virtual_anime_id}", prefixes::FALLBACK_ANIME);
    cache.set(&key, &binding, BINDING_TTL).await
}

pub async fn lookup_anime<C: CacheStore>(cache: &C, virtual_anime_id: i64) -> Result<Option<AnimeBinding>> {
    let key = format!("{}{virtual_anime_id}", prefixes::FALLBACK_ANIME);
    cache.get(&key).await
}

/// Bind a synthetic episode id to provider routing info. `ttl` should
/// be [`WHOLE_SHOW_TTL`] when `episode_id` encodes the whole-show
/// record (episode number `0000`) and [`BINDING_TTL`] otherwise.
pub async fn bind_episode<C: CacheStore>(
    cache: &C,
    episode_id: i64,
    binding: &EpisodeBinding,
    ttl: Duration,
) -> Result<()> {
    let key = format!("{}{episode_id}", prefixes::FALLBACK_EPISODE);
    cache.set(&key, binding, ttl).await
}

pub async fn lookup_episode<C: CacheStore>(cache: &C, episode_id: i64) -> Result<Option<EpisodeBinding>> {
    let key = format!("{}{episode_id}", prefixes::FALLBACK_EPISODE);
    cache.get(&key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku_cache::MemoryCacheStore;

    #[test]
    fn minter_advances_monotonically_from_base() {
        let minter = VirtualIdMinter::new();
        let a = minter.mint();
        let b = minter.mint();
        assert_eq!(a, VIRTUAL_ANIME_ID_BASE);
        assert_eq!(b, VIRTUAL_ANIME_ID_BASE + 1);
    }

    #[tokio::test]
    async fn anime_binding_round_trips_through_cache() {
        let cache = MemoryCacheStore::new();
        let hit = ProviderSearchInfo {
            provider: "tencent".into(),
            media_id: "m1".into(),
            title: "Show".into(),
            kind: MediaKind::TvSeries,
            season: 1,
            year: Some(2024),
            episode_count: None,
            image_url: None,
        };
        bind_anime(&cache, 900_000, &hit, 42).await.unwrap();
        let found = lookup_anime(&cache, 900_000).await.unwrap().unwrap();
        assert_eq!(found.real_anime_id, 42);
        assert_eq!(found.title, "Show");
    }

    #[tokio::test]
    async fn missing_episode_binding_is_none() {
        let cache = MemoryCacheStore::new();
        assert!(lookup_episode(&cache, 25_900_000_000_001).await.unwrap().is_none());
    }
}
