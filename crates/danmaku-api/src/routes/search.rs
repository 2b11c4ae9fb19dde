//! `/search/episodes` (library-only) and `/search/anime` (library first,
//! falling back to the scraper adapters when nothing local matches).

use actix_web::{web, HttpRequest};
use danmaku_cache::CacheStoreExt;
use danmaku_core::text::parse_filename;
use danmaku_fallback::{run_search_fallback, FallbackSession, SessionState, SEARCHING_PLACEHOLDER_ID};
use danmaku_tasks::{QueueType, SubmitTask};
use serde::Deserialize;
use std::time::Duration;

use crate::dto::{AnimeDto, EpisodeDto, SearchAnimeItem, SearchAnimeResponse, SearchEpisodesResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchEpisodesQuery {
    pub anime: String,
    pub episode: Option<String>,
}

/// Library-only lookup: fuzzy-match `anime` against local titles and, if
/// `episode` is present, filter each anime's episodes to matching ones.
pub async fn search_episodes(
    state: web::Data<AppState>,
    query: web::Query<SearchEpisodesQuery>,
) -> ApiResult<web::Json<SearchEpisodesResponse>> {
    let parsed = parse_filename(&query.anime);
    let title = if parsed.title.is_empty() { query.anime.clone() } else { parsed.title };

    let candidates = state.library.search_anime_by_title(&title).await.map_err(ApiError)?;
    let requested_episode: Option<i32> = query.episode.as_deref().and_then(|e| e.parse().ok());

    let mut animes = Vec::new();
    for anime in candidates {
        let sources = state.library.find_sources(anime.id).await.map_err(ApiError)?;
        let mut episodes = Vec::new();
        for source in &sources {
            let source_episodes = state.library.list_episodes(source.id).await.map_err(ApiError)?;
            for ep in source_episodes {
                if let Some(requested) = requested_episode {
                    if ep.episode_index != requested {
                        continue;
                    }
                }
                episodes.push(EpisodeDto {
                    episode_id: ep.id,
                    episode_title: format!("第{}话 {}", ep.episode_index, ep.title),
                });
            }
        }
        if episodes.is_empty() {
            continue;
        }
        animes.push(AnimeDto {
            anime_id: anime.id,
            anime_title: anime.title.clone(),
            kind: anime.content_type.dandan_type().to_string(),
            type_description: anime.content_type.dandan_type_description().to_string(),
            episodes,
        });
    }

    Ok(web::Json(SearchEpisodesResponse {
        success: true,
        has_more: false,
        animes,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchAnimeQuery {
    pub keyword: String,
}

/// Library lookup first; on a miss, dispatches the search fallback
/// engine synchronously if enabled and the caller's token is authorized.
/// A running/just-dispatched fallback session is tracked under a
/// `fallback_search_<keyword>` cache key so a second identical request
/// arriving while the first is in flight reuses its result instead of
/// dispatching a duplicate fan-out.
pub async fn search_anime(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<SearchAnimeQuery>,
) -> ApiResult<web::Json<SearchAnimeResponse>> {
    let library_hits = state.library.search_anime_by_title(&query.keyword).await.map_err(ApiError)?;
    if !library_hits.is_empty() {
        let animes = library_hits
            .into_iter()
            .map(|a| SearchAnimeItem {
                anime_id: a.id,
                bangumi_id: a.id.to_string(),
                anime_title: a.title,
                kind: a.content_type.dandan_type().to_string(),
                type_description: a.content_type.dandan_type_description().to_string(),
                year: a.year,
                image_url: a.image_url,
            })
            .collect();
        return Ok(web::Json(SearchAnimeResponse { success: true, animes }));
    }

    let fallback_enabled = state.config.get_bool("searchFallbackEnabled", true).await.map_err(ApiError)?;
    let token = req.match_info().get("token").unwrap_or("").to_string();
    let allowed_raw = state.config.get_or("matchFallbackTokens", "[]").await.map_err(ApiError)?;
    let allowed: Vec<String> = serde_json::from_str(&allowed_raw).unwrap_or_default();
    let authorized = allowed.is_empty() || danmaku_fallback::token_is_authorized(&token, &allowed);

    if !fallback_enabled || !authorized {
        return Ok(web::Json(SearchAnimeResponse { success: true, animes: vec![] }));
    }

    let session_key = format!("fallback_search_{}", query.keyword);
    if let Some(session) = state
        .cache
        .get::<FallbackSession<Vec<SearchAnimeItem>>>(&session_key)
        .await
        .map_err(ApiError)?
    {
        if session.state == SessionState::Completed {
            return Ok(web::Json(SearchAnimeResponse {
                success: true,
                animes: session.result.unwrap_or_default(),
            }));
        }
        // Still running (or failed and not yet retried): hand back the
        // reserved placeholder rather than dispatching a duplicate fan-out.
        return Ok(web::Json(SearchAnimeResponse {
            success: true,
            animes: vec![searching_placeholder(&session)],
        }));
    }

    let running: FallbackSession<Vec<SearchAnimeItem>> = FallbackSession::running();
    state
        .cache
        .set(&session_key, &running, Duration::from_secs(5 * 60))
        .await
        .map_err(ApiError)?;

    dispatch_search_fallback(&state, session_key, query.keyword.clone()).await;

    Ok(web::Json(SearchAnimeResponse {
        success: true,
        animes: vec![searching_placeholder(&running)],
    }))
}

/// The reserved "searching at N%" item returned to a poller while the
/// fallback task is still in flight (§4.5.2 step 1).
fn searching_placeholder(session: &FallbackSession<Vec<SearchAnimeItem>>) -> SearchAnimeItem {
    SearchAnimeItem {
        anime_id: SEARCHING_PLACEHOLDER_ID,
        bangumi_id: SEARCHING_PLACEHOLDER_ID.to_string(),
        anime_title: "正在搜索".to_string(),
        kind: "tvseries".to_string(),
        type_description: format!("搜索中 {}%", session.synthetic_progress()),
        year: None,
        image_url: None,
    }
}

/// Submits the §4.5.2 step 3 fan-out onto the `fallback` queue. Fire
/// and forget: the session row in cache is how callers observe
/// completion, not this function's return value. `unique_key` dedup on
/// the session key means a second poll arriving before the worker picks
/// the job up just gets a `Conflict` here, which is fine — the
/// already-queued task will still complete and populate the session.
async fn dispatch_search_fallback(state: &AppState, session_key: String, keyword: String) {
    let cache = state.cache.clone();
    let library = state.library.clone();
    let adapters = state.adapters.clone();
    let metadata = state.metadata.clone();
    let virtual_ids = state.virtual_ids.clone();
    let result_key = session_key.clone();

    let factory: danmaku_tasks::TaskFactory = Box::new(move |_progress, _cancel| {
        Box::pin(async move {
            let outcome = run_search_fallback(
                cache.as_ref(),
                library.as_ref(),
                adapters.as_ref(),
                Some(metadata.as_ref()),
                virtual_ids.as_ref(),
                &[keyword],
                None,
                None,
                None,
                None,
            )
            .await;

            match outcome {
                Ok(items) => {
                    let animes: Vec<SearchAnimeItem> = items
                        .into_iter()
                        .map(|item| SearchAnimeItem {
                            anime_id: item.animal_id,
                            bangumi_id: item.animal_id.to_string(),
                            anime_title: item.title,
                            kind: item.kind.to_string(),
                            type_description: item.type_description,
                            year: item.year,
                            image_url: item.image_url,
                        })
                        .collect();
                    let count = animes.len();
                    let completed = FallbackSession::completed(animes);
                    let _ = cache.set(&result_key, &completed, Duration::from_secs(5 * 60)).await;
                    Ok(format!("found {count} result(s)"))
                }
                Err(e) => {
                    let failed: FallbackSession<Vec<SearchAnimeItem>> = FallbackSession::failed(e.to_string());
                    let _ = cache.set(&result_key, &failed, Duration::from_secs(5 * 60)).await;
                    Err(e.to_string())
                }
            }
        })
    });

    let _ = state
        .task_manager
        .submit_task(SubmitTask {
            factory,
            title: format!("search fallback: {session_key}"),
            unique_key: Some(session_key),
            queue_type: QueueType::Fallback,
            task_type: Some("searchFallback".to_string()),
            run_immediately: false,
            scheduled_task_id: None,
        })
        .await;
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/search/episodes", web::get().to(search_episodes))
        .route("/search/anime", web::get().to(search_anime));
}
