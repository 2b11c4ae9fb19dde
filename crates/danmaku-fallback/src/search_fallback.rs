//! Search fallback (§4.5.2): free-text queries the library can't
//! satisfy are handed to the scraper adapters and synthesized into
//! dandanplay-compatible search results before anything is persisted.

use std::sync::Arc;

use danmaku_core::text::format_episode_ranges;
use danmaku_core::Result;
use danmaku_metadata::MetadataRegistry;
use danmaku_providers::{search_all, AdapterRegistry, EpisodeQuery, MediaKind, ProviderSearchInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};

use danmaku_cache::CacheStore;

use crate::repository::LibraryRepository;
use crate::virtual_id::{bind_anime, VirtualIdMinter};

/// Reserved bangumiId returned while a search session is still `running`.
pub const SEARCHING_PLACEHOLDER_ID: i64 = 999_999_999;

/// A single synthesized search hit, shaped after the external
/// `DandanSearchAnimeItem` the compat API surface serializes directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSearchItem {
    pub animal_id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub type_description: String,
    pub year: Option<i32>,
    pub image_url: Option<String>,
}

/// Titles containing any of these are re-labeled `movie` even when the
/// adapter reported them as a TV series.
const MOVIE_KEYWORDS: &[&str] = &["剧场版", "劇場版", "movie", "the movie"];

fn relabel_as_movie_if_needed(hit: &mut ProviderSearchInfo) {
    if hit.kind == MediaKind::TvSeries {
        let lowered = hit.title.to_lowercase();
        if MOVIE_KEYWORDS.iter().any(|kw| lowered.contains(&kw.to_lowercase())) {
            hit.kind = MediaKind::Movie;
        }
    }
}

fn type_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::TvSeries => "tvseries",
        MediaKind::Movie => "movie",
        MediaKind::Ova => "ova",
        MediaKind::Other => "other",
    }
}

fn type_description(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::TvSeries => "TV动画",
        MediaKind::Movie => "电影/剧场版",
        MediaKind::Ova => "OVA",
        MediaKind::Other => "其他",
    }
}

/// Run the full §4.5.2 pipeline once a session has been claimed as the
/// one to actually do the work (the caller is responsible for the
/// single-flight session gate and token authorization check).
pub async fn run_search_fallback<C: CacheStore>(
    cache: &C,
    repo: &dyn LibraryRepository,
    registry: &AdapterRegistry,
    metadata: Option<&MetadataRegistry>,
    minter: &VirtualIdMinter,
    keywords: &[String],
    episode_info: Option<&EpisodeQuery>,
    requested_season: Option<i32>,
    blacklist_cn: Option<&Regex>,
    blacklist_eng: Option<&Regex>,
) -> Result<Vec<FallbackSearchItem>> {
    let mut hits = search_all(registry, keywords, episode_info, blacklist_cn, blacklist_eng).await?;

    if hits.is_empty() {
        if let Some(metadata) = metadata {
            hits.extend(supplement_from_metadata(metadata, registry, keywords, episode_info).await);
        }
    }

    for hit in &mut hits {
        relabel_as_movie_if_needed(hit);
    }

    if let Some(season) = requested_season {
        hits.retain(|h| h.kind != MediaKind::TvSeries || h.season == season);
    }

    let mut items = Vec::with_capacity(hits.len());
    for hit in hits {
        let virtual_id = minter.mint();
        let real_anime_id = repo.next_anime_id().await?;
        bind_anime(cache, virtual_id, &hit, real_anime_id).await?;

        let library_episodes = library_episode_numbers(repo, &hit.title, hit.season).await?;
        let mut description = type_description(hit.kind).to_string();
        if !library_episodes.is_empty() {
            description = format!(
                "{description}（库内：{}）",
                format_episode_ranges(&library_episodes)
            );
        }

        items.push(FallbackSearchItem {
            animal_id: virtual_id,
            title: hit.title,
            kind: type_label(hit.kind),
            type_description: description,
            year: hit.year,
            image_url: hit.image_url,
        });
    }

    Ok(items)
}

/// Every registered adapter came back empty for every keyword; give the
/// metadata sources (TMDB/Bangumi/Douban/...) a chance to rescue the
/// search before reporting nothing found.
async fn supplement_from_metadata(
    metadata: &MetadataRegistry,
    registry: &AdapterRegistry,
    keywords: &[String],
    episode_info: Option<&EpisodeQuery>,
) -> Vec<ProviderSearchInfo> {
    let mut hits = Vec::new();
    for provider in registry.all_provider_names() {
        for keyword in keywords {
            hits.extend(metadata.supplement_search_result(&provider, keyword, episode_info).await);
        }
    }
    hits
}

async fn library_episode_numbers(repo: &dyn LibraryRepository, title: &str, season: i32) -> Result<Vec<i32>> {
    let Some(anime) = repo.find_anime_by_title_season(title, season).await? else {
        return Ok(Vec::new());
    };
    let mut indices = Vec::new();
    for source in repo.find_sources(anime.id).await? {
        for episode in repo.list_episodes(source.id).await? {
            indices.push(episode.episode_index);
        }
    }
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

/// Whether a token may trigger search fallback, per the
/// `matchFallbackTokens` allow-list. An empty list authorizes nobody;
/// callers should treat an empty config as "feature disabled" upstream.
pub fn token_is_authorized(token: &str, allowed_tokens: &[String]) -> bool {
    allowed_tokens.iter().any(|t| t == token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku_cache::MemoryCacheStore;
    use danmaku_providers::{AdapterDescriptor, AdapterSettings, ProviderEpisodeInfo, RawComment, ScraperAdapter};
    use async_trait::async_trait;

    struct FixedAdapter {
        descriptor: AdapterDescriptor,
        hits: Vec<ProviderSearchInfo>,
    }

    #[async_trait]
    impl ScraperAdapter for FixedAdapter {
        fn descriptor(&self) -> &AdapterDescriptor {
            &self.descriptor
        }
        async fn search(&self, _keyword: &str, _episode_info: Option<&EpisodeQuery>) -> Result<Vec<ProviderSearchInfo>> {
            Ok(self.hits.clone())
        }
        async fn get_episodes(&self, _media_id: &str, _db_media_type: Option<MediaKind>) -> Result<Vec<ProviderEpisodeInfo>> {
            Ok(vec![])
        }
        async fn get_comments(&self, _episode_id: &str, _progress: Option<danmaku_providers::ProgressCallback>) -> Result<Vec<RawComment>> {
            Ok(vec![])
        }
        fn get_id_from_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    fn descriptor(name: &str) -> AdapterDescriptor {
        AdapterDescriptor {
            provider_name: name.to_string(),
            handled_domains: vec![],
            rate_limit_quota: None,
            configurable_fields: Default::default(),
            test_url: None,
            referer: None,
            is_loggable: false,
        }
    }

    fn hit(provider: &str, title: &str, kind: MediaKind, season: i32) -> ProviderSearchInfo {
        ProviderSearchInfo {
            provider: provider.to_string(),
            media_id: "m1".to_string(),
            title: title.to_string(),
            kind,
            season,
            year: Some(2024),
            episode_count: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn movie_keyword_relabels_tv_result_as_movie() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter {
                    descriptor: descriptor("a"),
                    hits: vec![hit("a", "Show 剧场版", MediaKind::TvSeries, 1)],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let cache = MemoryCacheStore::new();
        let repo = crate::repository::InMemoryLibraryRepository::new();
        let minter = VirtualIdMinter::new();

        let items = run_search_fallback(&cache, &repo, &registry, None, &minter, &["Show".into()], None, None, None, None)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, "movie");
    }

    #[tokio::test]
    async fn season_filter_drops_non_matching_tv_results() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter {
                    descriptor: descriptor("a"),
                    hits: vec![
                        hit("a", "Show S1", MediaKind::TvSeries, 1),
                        hit("a", "Show S2", MediaKind::TvSeries, 2),
                    ],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let cache = MemoryCacheStore::new();
        let repo = crate::repository::InMemoryLibraryRepository::new();
        let minter = VirtualIdMinter::new();

        let items = run_search_fallback(&cache, &repo, &registry, None, &minter, &["Show".into()], None, Some(2), None, None)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Show S2");
    }

    #[tokio::test]
    async fn each_hit_gets_a_distinct_virtual_id() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter {
                    descriptor: descriptor("a"),
                    hits: vec![hit("a", "One", MediaKind::TvSeries, 1), hit("a", "Two", MediaKind::TvSeries, 1)],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let cache = MemoryCacheStore::new();
        let repo = crate::repository::InMemoryLibraryRepository::new();
        let minter = VirtualIdMinter::new();

        let items = run_search_fallback(&cache, &repo, &registry, None, &minter, &["q".into()], None, None, None, None)
            .await
            .unwrap();
        assert_ne!(items[0].animal_id, items[1].animal_id);
    }

    #[test]
    fn token_authorization_checks_exact_membership() {
        let allowed = vec!["tok-a".to_string(), "tok-b".to_string()];
        assert!(token_is_authorized("tok-a", &allowed));
        assert!(!token_is_authorized("tok-c", &allowed));
    }
}
