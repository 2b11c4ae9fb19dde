//! `/comment/{episodeId}` and `/extcomment`: comment retrieval (§4.5.4)
//! and pre-download of the next episode (§4.5.5).

use std::time::Duration;

use actix_web::web;
use danmaku_cache::CacheStoreExt;
use danmaku_core::GatewayError;
use danmaku_fallback::{fetch_comments, lookup_episode, predownload_next_episode, ChConvert};
use serde::Deserialize;

use crate::dto::{CommentItem, CommentResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const EXT_COMMENT_CACHE_TTL: Duration = Duration::from_secs(5 * 3600);

fn parse_ch_convert(raw: Option<i32>) -> ChConvert {
    match raw {
        Some(1) => ChConvert::ToSimplified,
        Some(2) => ChConvert::ToTraditional,
        _ => ChConvert::None,
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    #[serde(rename = "chConvert")]
    ch_convert: Option<i32>,
    from: Option<f64>,
    #[serde(rename = "withRelated")]
    with_related: Option<bool>,
}

pub async fn get_comment(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<CommentQuery>,
) -> ApiResult<web::Json<CommentResponse>> {
    let episode_id = path.into_inner();
    let ch_convert = parse_ch_convert(query.ch_convert);

    let output_cap = {
        let raw = state.config.get_or("danmakuOutputLimitPerSource", "-1").await.map_err(ApiError)?;
        raw.parse::<i64>().ok().filter(|n| *n >= 0).map(|n| n as usize)
    };

    let mut comments = fetch_comments(
        state.cache.as_ref(),
        state.library.as_ref(),
        state.adapters.as_ref(),
        state.rate_limiter.as_ref(),
        episode_id,
        output_cap,
        ch_convert,
    )
    .await
    .map_err(ApiError)?;

    if let Some(from) = query.from {
        comments.retain(|c| c.time_sec >= from);
    }
    let _with_related = query.with_related.unwrap_or(false);

    maybe_predownload(&state, episode_id).await;

    let items: Vec<CommentItem> = comments
        .into_iter()
        .map(|c| CommentItem { cid: c.id, p: c.p_attribute(), m: c.text })
        .collect();

    Ok(web::Json(CommentResponse {
        success: true,
        count: items.len(),
        comments: items,
    }))
}

async fn maybe_predownload(state: &AppState, episode_id: i64) {
    let Ok(enabled) = state.config.get_bool("preDownloadNextEpisodeEnabled", true).await else {
        return;
    };
    if !enabled {
        return;
    }
    let Ok(Some(binding)) = lookup_episode(state.cache.as_ref(), episode_id).await else {
        return;
    };
    let Some(provider_episode_id) = binding.provider_episode_id.clone() else {
        return;
    };
    let Some(adapter) = state
        .adapters
        .enabled_sorted()
        .into_iter()
        .find(|a| a.descriptor().provider_name == binding.provider)
    else {
        return;
    };
    let Ok(episodes) = adapter.get_episodes(&binding.media_id, None).await else {
        return;
    };
    let next_index = binding.episode_index + 1;
    if !episodes.iter().any(|e| e.episode_index == next_index) {
        return;
    }

    predownload_next_episode(
        state.task_manager.clone(),
        state.adapters.clone(),
        binding.provider,
        binding.media_id,
        provider_episode_id,
        next_index,
    );
}

#[derive(Debug, Deserialize)]
pub struct ExtCommentQuery {
    url: String,
    #[serde(rename = "chConvert")]
    ch_convert: Option<i32>,
}

/// Resolve a provider URL directly to its adapter (by matching the
/// adapter's declared `handled_domains` against the URL's host), fetch
/// and cache the episode id it refers to, then serve comments through
/// the same path as `/comment/{episodeId}`.
pub async fn get_ext_comment(
    state: web::Data<AppState>,
    query: web::Query<ExtCommentQuery>,
) -> ApiResult<web::Json<CommentResponse>> {
    let ch_convert = parse_ch_convert(query.ch_convert);
    let cache_key = format!("extcomment_{}", query.url);

    if let Some(cached) = state.cache.get::<Vec<CommentItem>>(&cache_key).await.map_err(ApiError)? {
        return Ok(web::Json(CommentResponse { success: true, count: cached.len(), comments: cached }));
    }

    let host = reqwest::Url::parse(&query.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| ApiError(GatewayError::InputInvalid(format!("cannot parse url {}", query.url))))?;

    let adapter = state
        .adapters
        .enabled_sorted()
        .into_iter()
        .find(|a| a.descriptor().handled_domains.iter().any(|d| host.ends_with(d.as_str())))
        .ok_or_else(|| ApiError(GatewayError::NotFound(format!("no adapter handles domain {host}"))))?;

    let provider_episode_id = adapter
        .get_id_from_url(&query.url)
        .ok_or_else(|| ApiError(GatewayError::InputInvalid(format!("adapter could not resolve id from {}", query.url))))?;

    let raw = adapter.get_comments(&provider_episode_id, None).await.map_err(ApiError)?;
    let comments: Vec<CommentItem> = raw
        .into_iter()
        .enumerate()
        .map(|(idx, r)| CommentItem {
            cid: idx as i64,
            p: format!("{:.2},{},{}", r.time_sec, r.mode, r.color),
            m: danmaku_fallback::convert_ch(&r.text, ch_convert),
        })
        .collect();

    state.cache.set(&cache_key, &comments, EXT_COMMENT_CACHE_TTL).await.map_err(ApiError)?;

    Ok(web::Json(CommentResponse {
        success: true,
        count: comments.len(),
        comments,
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/comment/{episodeId}", web::get().to(get_comment))
        .route("/extcomment", web::get().to(get_ext_comment));
}
