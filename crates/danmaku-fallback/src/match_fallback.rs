//! Match fallback (§4.5.3): resolve a filename to a real or synthetic
//! episode id when the library has no direct hit.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use danmaku_core::episode_id::EpisodeIdParts;
use danmaku_core::models::{Anime, AnimeSource, ContentType, Episode};
use danmaku_core::text::{parse_filename, ParsedFilename};
use danmaku_core::Result;
use danmaku_providers::{search_all, AdapterRegistry, EpisodeQuery, MediaKind, ProviderSearchInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use danmaku_cache::CacheStore;

use crate::repository::LibraryRepository;
use crate::virtual_id::{bind_anime, bind_episode, EpisodeBinding, VirtualIdMinter, BINDING_TTL, WHOLE_SHOW_TTL};

/// Minimum title similarity (0..=100) for a favorited candidate to be
/// auto-preferred over the top-scored candidate when no AI matcher is
/// configured.
const FAVORITED_SIMILARITY_THRESHOLD: f64 = 80.0;

/// Dedup window: a completed fallback for the same (title, season,
/// episode) suppresses a new dispatch within this window.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// The normalized query a match fallback run resolves against.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub title: String,
    pub season: i32,
    pub episode: Option<i32>,
    pub year: Option<i32>,
}

impl MatchQuery {
    pub fn from_filename(filename: &str) -> (Self, ParsedFilename) {
        let parsed = parse_filename(filename);
        let query = Self {
            title: parsed.title.clone(),
            season: parsed.season,
            episode: parsed.episode,
            year: None,
        };
        (query, parsed)
    }

    pub fn is_movie(&self) -> bool {
        self.episode.is_none()
    }

    /// The dedup-window key for this query.
    pub fn dedup_key(&self) -> String {
        format!("match_fallback_dedup_{}_{}_{}", self.title, self.season, self.episode.unwrap_or(0))
    }
}

/// A candidate search hit with its computed match score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub hit: ProviderSearchInfo,
    pub score: i32,
    pub is_favorited: bool,
}

/// Score candidates per §4.5.3: an exact content-type match contributes
/// 1000, title similarity contributes 0-100, and source priority order
/// (lower = earlier adapter, preferred) breaks remaining ties via the
/// caller's sort, not the score itself.
pub fn score_candidates(
    hits: Vec<ProviderSearchInfo>,
    query: &MatchQuery,
    favorited: &[(String, String)],
) -> Vec<ScoredCandidate> {
    let expected_kind = if query.is_movie() { MediaKind::Movie } else { MediaKind::TvSeries };
    hits.into_iter()
        .map(|hit| {
            let type_score = if hit.kind == expected_kind { 1000 } else { 0 };
            let similarity = (normalized_levenshtein(&hit.title, &query.title) * 100.0) as i32;
            let is_favorited = favorited.iter().any(|(p, m)| *p == hit.provider && *m == hit.media_id);
            ScoredCandidate {
                score: type_score + similarity,
                hit,
                is_favorited,
            }
        })
        .collect()
}

/// An injectable AI matcher: given scored candidates, returns the index
/// of the chosen one, or `None` to defer to the non-AI selection rule.
#[async_trait]
pub trait AiMatcher: Send + Sync {
    async fn select(&self, candidates: &[ScoredCandidate], query: &MatchQuery) -> Result<Option<usize>>;
}

/// Choose a candidate per the non-AI selection rule: a favorited
/// candidate whose title similarity clears the threshold wins;
/// otherwise the top-scored candidate.
fn select_without_ai(candidates: &[ScoredCandidate], query: &MatchQuery) -> Option<usize> {
    if let Some((idx, _)) = candidates.iter().enumerate().find(|(_, c)| {
        c.is_favorited && normalized_levenshtein(&c.hit.title, &query.title) * 100.0 >= FAVORITED_SIMILARITY_THRESHOLD
    }) {
        return Some(idx);
    }
    candidates
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| c.score)
        .map(|(idx, _)| idx)
}

/// Whether `filename` is excluded from fallback dispatch by a
/// configured blacklist regex.
pub fn is_blacklisted_filename(filename: &str, blacklist: Option<&Regex>) -> bool {
    blacklist.map(|re| re.is_match(filename)).unwrap_or(false)
}

/// The materialized result of a successful match — either a direct
/// library hit or a fallback run, both shaped the same way so a
/// caller's response-building code doesn't need to know which path
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub episode_id: i64,
    pub virtual_anime_id: i64,
    pub anime_title: String,
    pub content_type: ContentType,
    pub episode_index: i32,
}

/// Probe each candidate, in the order given, by fetching its episode
/// list and checking the requested episode is actually present;
/// returns the first candidate that validates, along with its resolved
/// provider episode info. Callers are responsible for ordering
/// `candidates` (typically the preferred pick first, then the rest by
/// descending score) since a failed probe on the first entry falls
/// through to the next.
pub async fn probe_and_select(
    registry: &AdapterRegistry,
    candidates: &[ScoredCandidate],
    query: &MatchQuery,
) -> Result<Option<(ScoredCandidate, Option<String>)>> {
    for candidate in candidates {
        let Some(adapter) = registry.enabled_sorted().into_iter().find(|a| a.descriptor().provider_name == candidate.hit.provider) else {
            continue;
        };
        if query.is_movie() {
            if candidate.hit.kind == MediaKind::Movie {
                return Ok(Some((candidate.clone(), None)));
            }
            continue;
        }

        let episodes = adapter.get_episodes(&candidate.hit.media_id, Some(candidate.hit.kind)).await?;
        if let Some(requested) = query.episode {
            if let Some(found) = episodes.iter().find(|e| e.episode_index == requested) {
                return Ok(Some((candidate.clone(), Some(found.episode_id.clone()))));
            }
        }
    }
    Ok(None)
}

/// Allocate (or reuse) the real anime id, source, and episode rows for
/// a validated candidate, mint its episode id, bind the fallback cache
/// entries, and materialize the library rows.
pub async fn materialize<C: CacheStore>(
    cache: &C,
    repo: &dyn LibraryRepository,
    minter: &VirtualIdMinter,
    candidate: &ScoredCandidate,
    query: &MatchQuery,
    provider_episode_id: Option<String>,
) -> Result<MatchResult> {
    let kind = if query.is_movie() { ContentType::Movie } else { ContentType::TvSeries };

    let anime_id = match repo.find_anime_by_title_season(&candidate.hit.title, query.season).await? {
        Some(existing) => existing.id,
        None => {
            let next_id = repo.next_anime_id().await?;
            repo.create_anime_if_not_exists(&Anime {
                id: next_id,
                title: candidate.hit.title.clone(),
                season: query.season,
                content_type: kind,
                year: candidate.hit.year,
                image_url: candidate.hit.image_url.clone(),
                tmdb_id: None,
                tmdb_episode_group_id: None,
                created_at: Utc::now(),
            })
            .await?;
            repo.sync_anime_id_sequence().await?;
            next_id
        }
    };

    let source_order = match repo.find_source(anime_id, &candidate.hit.provider, &candidate.hit.media_id).await? {
        Some(existing) => existing.source_order,
        None => {
            let order = repo.next_source_order(anime_id).await?;
            repo.create_source_if_not_exists(&AnimeSource {
                id: anime_id * 100 + order as i64,
                anime_id,
                provider_name: candidate.hit.provider.clone(),
                media_id: candidate.hit.media_id.clone(),
                source_order: order,
                is_favorited: candidate.is_favorited,
                incremental_refresh_enabled: false,
                last_refresh_latest_episode_at: None,
                incremental_refresh_failures: 0,
            })
            .await?;
            order
        }
    };

    let episode_number = query.episode.unwrap_or(0);
    let episode_id = EpisodeIdParts {
        anime_id,
        source_order,
        episode_number,
    }
    .encode()?;

    let virtual_anime_id = minter.mint();
    bind_anime(cache, virtual_anime_id, &candidate.hit, anime_id).await?;
    bind_episode(
        cache,
        episode_id,
        &EpisodeBinding {
            provider: candidate.hit.provider.clone(),
            media_id: candidate.hit.media_id.clone(),
            provider_episode_id: provider_episode_id.clone(),
            episode_index: episode_number,
        },
        BINDING_TTL,
    )
    .await?;

    let whole_show_id = EpisodeIdParts {
        anime_id,
        source_order,
        episode_number: 0,
    }
    .encode()?;
    bind_episode(
        cache,
        whole_show_id,
        &EpisodeBinding {
            provider: candidate.hit.provider.clone(),
            media_id: candidate.hit.media_id.clone(),
            provider_episode_id: None,
            episode_index: 0,
        },
        WHOLE_SHOW_TTL,
    )
    .await?;

    repo.create_episode_if_not_exists(&Episode {
        id: episode_id,
        source_id: anime_id * 100 + source_order as i64,
        episode_index: episode_number,
        title: candidate.hit.title.clone(),
        source_url: None,
        provider_episode_id,
        comment_count: 0,
    })
    .await?;

    Ok(MatchResult {
        episode_id,
        virtual_anime_id,
        anime_title: candidate.hit.title.clone(),
        content_type: kind,
        episode_index: episode_number,
    })
}

/// Run the full dispatch-and-probe portion of §4.5.3 for an already
/// dedup/blacklist-cleared query: search, score, (optionally) consult
/// an AI matcher, probe the winner, and materialize it. Returns `None`
/// if nothing validated.
#[allow(clippy::too_many_arguments)]
pub async fn run_match_fallback<C: CacheStore>(
    cache: &C,
    repo: &dyn LibraryRepository,
    registry: &AdapterRegistry,
    minter: &VirtualIdMinter,
    query: &MatchQuery,
    alias_keywords: &[String],
    favorited: &[(String, String)],
    ai_matcher: Option<&dyn AiMatcher>,
    blacklist_cn: Option<&Regex>,
    blacklist_eng: Option<&Regex>,
) -> Result<Option<MatchResult>> {
    let episode_info = EpisodeQuery { season: Some(query.season), episode: query.episode };
    let hits = search_all(registry, alias_keywords, Some(&episode_info), blacklist_cn, blacklist_eng).await?;
    if hits.is_empty() {
        return Ok(None);
    }

    let candidates = score_candidates(hits, query, favorited);

    let chosen_idx = match ai_matcher {
        Some(matcher) => match matcher.select(&candidates, query).await? {
            Some(idx) => idx,
            None => match select_without_ai(&candidates, query) {
                Some(idx) => idx,
                None => return Ok(None),
            },
        },
        None => match select_without_ai(&candidates, query) {
            Some(idx) => idx,
            None => return Ok(None),
        },
    };

    // Probe the preferred pick first, then fall through the remaining
    // candidates in descending score order rather than giving up the
    // moment the preferred one's episode list doesn't have what was asked.
    let mut probe_order = vec![candidates[chosen_idx].clone()];
    let mut rest: Vec<ScoredCandidate> = candidates
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != chosen_idx)
        .map(|(_, c)| c.clone())
        .collect();
    rest.sort_by_key(|c| std::cmp::Reverse(c.score));
    probe_order.extend(rest);

    let probed = probe_and_select(registry, &probe_order, query).await?;
    let Some((candidate, provider_episode_id)) = probed else {
        return Ok(None);
    };

    let result = materialize(cache, repo, minter, &candidate, query, provider_episode_id).await?;
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku_providers::{AdapterDescriptor, AdapterSettings, ProviderEpisodeInfo, RawComment};
    use std::sync::Arc;

    struct FixedEpisodesAdapter {
        descriptor: AdapterDescriptor,
        episodes: Vec<ProviderEpisodeInfo>,
    }

    #[async_trait]
    impl ScraperAdapter for FixedEpisodesAdapter {
        fn descriptor(&self) -> &AdapterDescriptor {
            &self.descriptor
        }
        async fn search(&self, _keyword: &str, _episode_info: Option<&EpisodeQuery>) -> Result<Vec<ProviderSearchInfo>> {
            Ok(vec![])
        }
        async fn get_episodes(&self, _media_id: &str, _db_media_type: Option<MediaKind>) -> Result<Vec<ProviderEpisodeInfo>> {
            Ok(self.episodes.clone())
        }
        async fn get_comments(&self, _episode_id: &str, _progress: Option<danmaku_providers::ProgressCallback>) -> Result<Vec<RawComment>> {
            Ok(vec![])
        }
        fn get_id_from_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    fn episode_descriptor(name: &str) -> AdapterDescriptor {
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

    #[tokio::test]
    async fn probe_and_select_falls_through_to_next_candidate_on_a_failed_probe() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedEpisodesAdapter {
                    descriptor: episode_descriptor("top"),
                    episodes: vec![ProviderEpisodeInfo {
                        episode_id: "top-e1".to_string(),
                        episode_index: 1,
                        title: "ep1".to_string(),
                        url: None,
                    }],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();
        registry
            .register(
                Arc::new(FixedEpisodesAdapter {
                    descriptor: episode_descriptor("runner_up"),
                    episodes: vec![ProviderEpisodeInfo {
                        episode_id: "runner-e3".to_string(),
                        episode_index: 3,
                        title: "ep3".to_string(),
                        url: None,
                    }],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let query = MatchQuery { title: "Show".into(), season: 1, episode: Some(3), year: None };
        // "top" scores higher (exact title) but doesn't have episode 3;
        // "runner_up" scores lower but does. Probing must fall through.
        let candidates = vec![
            ScoredCandidate { hit: hit("top", "Show", MediaKind::TvSeries), score: 1100, is_favorited: false },
            ScoredCandidate { hit: hit("runner_up", "Shou", MediaKind::TvSeries), score: 900, is_favorited: false },
        ];

        let result = probe_and_select(&registry, &candidates, &query).await.unwrap();
        let (selected, provider_episode_id) = result.expect("the runner-up should validate");
        assert_eq!(selected.hit.provider, "runner_up");
        assert_eq!(provider_episode_id, Some("runner-e3".to_string()));
    }

    fn hit(provider: &str, title: &str, kind: MediaKind) -> ProviderSearchInfo {
        ProviderSearchInfo {
            provider: provider.to_string(),
            media_id: "m".to_string(),
            title: title.to_string(),
            kind,
            season: 1,
            year: None,
            episode_count: None,
            image_url: None,
        }
    }

    #[test]
    fn exact_type_match_outscores_title_similarity_alone() {
        let query = MatchQuery { title: "Spy Family".into(), season: 1, episode: Some(3), year: None };
        let scored = score_candidates(
            vec![hit("a", "Spy Family", MediaKind::Movie), hit("b", "Spy Fam", MediaKind::TvSeries)],
            &query,
            &[],
        );
        let tv = scored.iter().find(|c| c.hit.provider == "b").unwrap();
        let movie = scored.iter().find(|c| c.hit.provider == "a").unwrap();
        assert!(tv.score > movie.score, "type-matching TV candidate should outscore an exact-title movie for a TV query");
    }

    #[test]
    fn favorited_candidate_above_threshold_wins_without_ai() {
        let query = MatchQuery { title: "Spy Family".into(), season: 1, episode: Some(3), year: None };
        let candidates = score_candidates(
            vec![hit("a", "Spy Family", MediaKind::TvSeries), hit("b", "Totally Different Show", MediaKind::TvSeries)],
            &query,
            &[("a".to_string(), "m".to_string())],
        );
        let chosen = select_without_ai(&candidates, &query).unwrap();
        assert_eq!(candidates[chosen].hit.provider, "a");
    }

    #[test]
    fn blacklisted_filename_is_rejected() {
        let re = Regex::new("(?i)cam").unwrap();
        assert!(is_blacklisted_filename("Movie.CAM.Rip.mkv", Some(&re)));
        assert!(!is_blacklisted_filename("Movie.1080p.mkv", Some(&re)));
    }

    #[test]
    fn match_query_from_filename_recovers_episode() {
        let (query, parsed) = MatchQuery::from_filename("Spy Family S01E03.mkv");
        assert_eq!(query.title, "Spy Family");
        assert_eq!(query.episode, Some(3));
        assert!(!parsed.is_movie());
    }

    #[tokio::test]
    async fn materialize_reuses_existing_anime_row() {
        use danmaku_cache::MemoryCacheStore;
        use crate::repository::InMemoryLibraryRepository;

        let cache = MemoryCacheStore::new();
        let repo = InMemoryLibraryRepository::new();
        let minter = VirtualIdMinter::new();
        let query = MatchQuery { title: "Show".into(), season: 1, episode: Some(1), year: None };
        let candidate = ScoredCandidate { hit: hit("a", "Show", MediaKind::TvSeries), score: 1000, is_favorited: false };

        let first = materialize(&cache, &repo, &minter, &candidate, &query, Some("p1".into())).await.unwrap();

        let query2 = MatchQuery { title: "Show".into(), season: 1, episode: Some(2), year: None };
        let second = materialize(&cache, &repo, &minter, &candidate, &query2, Some("p2".into())).await.unwrap();

        let decoded_first = danmaku_core::episode_id::decode_episode_id(first.episode_id).unwrap();
        let decoded_second = danmaku_core::episode_id::decode_episode_id(second.episode_id).unwrap();
        assert_eq!(decoded_first.anime_id, decoded_second.anime_id, "same (title, season) should reuse the anime row");
    }
}
