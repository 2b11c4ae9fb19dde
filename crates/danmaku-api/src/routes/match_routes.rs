//! `/match` and `/match/batch`: resolve a filename to a matched episode,
//! consulting the library first and the match fallback engine (§4.5.3)
//! on a miss.

use std::collections::HashSet;
use std::time::Duration;

use actix_web::{web, HttpRequest};
use danmaku_cache::CacheStoreExt;
use danmaku_fallback::{is_blacklisted_filename, run_match_fallback, MatchQuery, MatchResult, DEDUP_WINDOW};
use regex::Regex;

use crate::dto::{MatchBatchRequest, MatchBatchResponse, MatchItem, MatchRequest, MatchResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_BATCH_SIZE: usize = 32;
/// The synchronous API response path's outer deadline (§4.5.3/§5):
/// past this, a request degrades to an unmatched result rather than
/// blocking the caller on a slow adapter.
const RESPONSE_BUDGET: Duration = Duration::from_secs(30);

/// Library lookup outcome for §4.5.3 step 2.
enum LibraryMatchOutcome {
    NotFound,
    /// Every hit shares one anime id.
    Matched(MatchResult),
    /// Hits span more than one anime id; report them all, unmatched.
    Ambiguous(Vec<MatchResult>),
}

async fn resolve_one(state: &AppState, token: &str, request: &MatchRequest) -> ApiResult<MatchResponse> {
    let (query, _parsed) = MatchQuery::from_filename(&request.file_name);

    match find_in_library(state, &query).await? {
        LibraryMatchOutcome::Matched(found) => return Ok(to_response(found)),
        LibraryMatchOutcome::Ambiguous(candidates) => {
            return Ok(MatchResponse {
                success: true,
                is_matched: false,
                matches: candidates.into_iter().map(to_match_item).collect(),
            });
        }
        LibraryMatchOutcome::NotFound => {}
    }

    let blacklist_raw = state.config.get_or("matchFallbackBlacklist", "").await.map_err(ApiError)?;
    let blacklist = (!blacklist_raw.is_empty()).then(|| Regex::new(&blacklist_raw).ok()).flatten();
    if is_blacklisted_filename(&request.file_name, blacklist.as_ref()) {
        return Ok(MatchResponse { success: true, is_matched: false, matches: vec![] });
    }

    let fallback_enabled = state.config.get_bool("matchFallbackEnabled", true).await.map_err(ApiError)?;
    let allowed_raw = state.config.get_or("matchFallbackTokens", "[]").await.map_err(ApiError)?;
    let allowed: Vec<String> = serde_json::from_str(&allowed_raw).unwrap_or_default();
    let authorized = allowed.is_empty() || danmaku_fallback::token_is_authorized(token, &allowed);
    if !fallback_enabled || !authorized {
        return Ok(MatchResponse { success: true, is_matched: false, matches: vec![] });
    }

    let dedup_key = query.dedup_key();
    if let Some(cached) = state.cache.get::<MatchResult>(&dedup_key).await.map_err(ApiError)? {
        return Ok(to_response(cached));
    }

    run_fallback_in_background(state, query).await
}

/// Submits the fallback run to the `fallback` task queue and awaits its
/// completion. The factory runs on the queue's own worker task,
/// independent of this function's future: if the caller's outer
/// timeout (`match_single`/`match_batch`) elapses while this is
/// awaiting `done`, only this await is abandoned — the task keeps
/// running in the background and still populates the dedup cache for
/// the next request, per §4.5.3's "keeps running in the background".
async fn run_fallback_in_background(state: &AppState, query: MatchQuery) -> ApiResult<MatchResponse> {
    let cache = state.cache.clone();
    let library = state.library.clone();
    let adapters = state.adapters.clone();
    let virtual_ids = state.virtual_ids.clone();
    let dedup_key = query.dedup_key();
    let result_key = dedup_key.clone();
    let final_key = dedup_key.clone();

    let factory: danmaku_tasks::TaskFactory = Box::new(move |_progress, _cancel| {
        Box::pin(async move {
            let outcome = run_match_fallback(
                cache.as_ref(),
                library.as_ref(),
                adapters.as_ref(),
                virtual_ids.as_ref(),
                &query,
                &[query.title.clone()],
                &[],
                None,
                None,
                None,
            )
            .await;

            match outcome {
                Ok(Some(found)) => {
                    let _ = cache.set(&result_key, &found, DEDUP_WINDOW).await;
                    Ok(format!("matched {}", found.anime_title))
                }
                Ok(None) => Ok("no candidate validated".to_string()),
                Err(e) => Err(e.to_string()),
            }
        })
    });

    let (_task_id, done) = state
        .task_manager
        .submit_task(danmaku_tasks::SubmitTask {
            factory,
            title: format!("match fallback: {dedup_key}"),
            unique_key: Some(dedup_key),
            queue_type: danmaku_tasks::QueueType::Fallback,
            task_type: Some("matchFallback".to_string()),
            run_immediately: true,
            scheduled_task_id: None,
        })
        .await
        .map_err(ApiError)?;

    match done.await {
        Ok(_outcome) => match state.cache.get::<MatchResult>(&final_key).await.map_err(ApiError)? {
            Some(found) => Ok(to_response(found)),
            None => Ok(MatchResponse { success: true, is_matched: false, matches: vec![] }),
        },
        // done_event sender dropped without a terminal state reaching
        // us; degrade to unmatched rather than propagating an error.
        Err(_) => Ok(MatchResponse { success: true, is_matched: false, matches: vec![] }),
    }
}

/// §4.5.3 step 2: direct library lookup, preferring a favorited source
/// when more than one source under the same anime has the episode, and
/// only reporting `isMatched=true` when every hit resolves to the same
/// anime id.
async fn find_in_library(state: &AppState, query: &MatchQuery) -> ApiResult<LibraryMatchOutcome> {
    let wanted = query.episode.unwrap_or(0);
    let candidates = state.library.search_anime_by_title(&query.title).await.map_err(ApiError)?;

    let mut hits = Vec::new();
    for anime in candidates {
        if anime.season != query.season {
            continue;
        }
        let mut sources = state.library.find_sources(anime.id).await.map_err(ApiError)?;
        sources.sort_by_key(|s| !s.is_favorited);

        for source in sources {
            let episodes = state.library.list_episodes(source.id).await.map_err(ApiError)?;
            if let Some(ep) = episodes.iter().find(|e| e.episode_index == wanted) {
                hits.push(MatchResult {
                    episode_id: ep.id,
                    virtual_anime_id: anime.id,
                    anime_title: anime.title.clone(),
                    content_type: anime.content_type,
                    episode_index: ep.episode_index,
                });
                break;
            }
        }
    }

    if hits.is_empty() {
        return Ok(LibraryMatchOutcome::NotFound);
    }

    let distinct_anime_ids: HashSet<i64> = hits.iter().map(|h| h.virtual_anime_id).collect();
    if distinct_anime_ids.len() == 1 {
        Ok(LibraryMatchOutcome::Matched(hits.into_iter().next().expect("checked non-empty above")))
    } else {
        Ok(LibraryMatchOutcome::Ambiguous(hits))
    }
}

fn to_match_item(result: MatchResult) -> MatchItem {
    MatchItem {
        episode_id: result.episode_id,
        anime_id: result.virtual_anime_id,
        anime_title: result.anime_title,
        episode_title: format!("第{}集", result.episode_index),
        kind: result.content_type.dandan_type().to_string(),
        type_description: result.content_type.dandan_type_description().to_string(),
    }
}

fn to_response(result: MatchResult) -> MatchResponse {
    MatchResponse {
        success: true,
        is_matched: true,
        matches: vec![to_match_item(result)],
    }
}

pub async fn match_single(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<MatchRequest>,
) -> ApiResult<web::Json<MatchResponse>> {
    let token = req.match_info().get("token").unwrap_or("").to_string();
    let response = match tokio::time::timeout(RESPONSE_BUDGET, resolve_one(&state, &token, &body)).await {
        Ok(result) => result?,
        Err(_) => MatchResponse { success: true, is_matched: false, matches: vec![] },
    };
    Ok(web::Json(response))
}

pub async fn match_batch(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<MatchBatchRequest>,
) -> ApiResult<web::Json<MatchBatchResponse>> {
    if body.requests.len() > MAX_BATCH_SIZE {
        return Err(ApiError(danmaku_core::GatewayError::InputInvalid(format!(
            "batch of {} exceeds the {MAX_BATCH_SIZE} request limit",
            body.requests.len()
        ))));
    }
    let token = req.match_info().get("token").unwrap_or("").to_string();

    let futures = body.requests.iter().map(|r| async {
        match tokio::time::timeout(RESPONSE_BUDGET, resolve_one(&state, &token, r)).await {
            Ok(result) => result,
            Err(_) => Ok(MatchResponse { success: true, is_matched: false, matches: vec![] }),
        }
    });

    let results = futures::future::join_all(futures)
        .await
        .into_iter()
        .map(|r| r.unwrap_or(MatchResponse { success: false, is_matched: false, matches: vec![] }))
        .collect();

    Ok(web::Json(MatchBatchResponse { success: true, results }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/match", web::post().to(match_single))
        .route("/match/batch", web::post().to(match_batch));
}
