//! Comment retrieval (§4.5.4) and next-episode pre-download (§4.5.5).
//!
//! Resolution order: the library first (materialized comments are
//! always preferred over a fresh provider fetch), then the fallback
//! binding minted by search/match fallback, then the live adapter.

use std::sync::Arc;
use std::time::Duration;

use danmaku_core::models::Comment;
use danmaku_core::{GatewayError, Result};
use danmaku_providers::AdapterRegistry;
use danmaku_ratelimit::{FallbackKind, RateLimiter};
use danmaku_tasks::{QueueType, SubmitTask, TaskManager};

use danmaku_cache::{prefixes, CacheStore, CacheStoreExt};

use crate::chconvert::{self, ChConvert};
use crate::repository::LibraryRepository;
use crate::virtual_id::lookup_episode;

/// TTL for the immediate post-fetch comment cache write.
const COMMENTS_CACHE_TTL: Duration = Duration::from_secs(3600);
/// TTL for a downsampled comment buffer cached under a `(episode_id, cap)` key.
const SAMPLED_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Evenly downsample `comments` (assumed sorted by `time_sec`) to at
/// most `cap` entries, preserving temporal spread rather than simply
/// truncating the tail.
pub fn sample_evenly(comments: &[Comment], cap: usize) -> Vec<Comment> {
    if cap == 0 || comments.len() <= cap {
        return comments.to_vec();
    }
    let stride = comments.len() as f64 / cap as f64;
    (0..cap)
        .map(|i| comments[((i as f64) * stride) as usize].clone())
        .collect()
}

/// Fetch (and cache-normalize) the capped, sampled set of comments for
/// `episode_id`, applying a per-source output limit if `output_cap` is
/// set and the requested `ch_convert` text transform.
pub async fn fetch_comments<C: CacheStore>(
    cache: &C,
    repo: &dyn LibraryRepository,
    registry: &AdapterRegistry,
    rate_limiter: &RateLimiter,
    episode_id: i64,
    output_cap: Option<usize>,
    ch_convert: ChConvert,
) -> Result<Vec<Comment>> {
    let sampled_key = output_cap.map(|cap| prefixes::sampled_key(episode_id, cap));
    if let Some(key) = &sampled_key {
        if let Some(hit) = cache.get::<Vec<Comment>>(key).await? {
            return Ok(apply_ch_convert(hit, ch_convert));
        }
    }

    let mut comments = repo.find_comments(episode_id).await?;

    if comments.is_empty() {
        comments = fetch_from_provider(cache, repo, registry, rate_limiter, episode_id).await?;
    }

    let capped = match output_cap {
        Some(cap) => sample_evenly(&comments, cap),
        None => comments,
    };

    if let Some(key) = &sampled_key {
        cache.set(key, &capped, SAMPLED_CACHE_TTL).await?;
    }

    Ok(apply_ch_convert(capped, ch_convert))
}

fn apply_ch_convert(comments: Vec<Comment>, mode: ChConvert) -> Vec<Comment> {
    if mode == ChConvert::None {
        return comments;
    }
    comments
        .into_iter()
        .map(|mut c| {
            c.text = chconvert::convert(&c.text, mode);
            c
        })
        .collect()
}

async fn fetch_from_provider<C: CacheStore>(
    cache: &C,
    repo: &dyn LibraryRepository,
    registry: &AdapterRegistry,
    rate_limiter: &RateLimiter,
    episode_id: i64,
) -> Result<Vec<Comment>> {
    let cache_key = format!("{}{episode_id}", prefixes::COMMENTS);
    if let Some(hit) = cache.get::<Vec<Comment>>(&cache_key).await? {
        return Ok(hit);
    }

    let Some(binding) = lookup_episode(cache, episode_id).await? else {
        return Ok(Vec::new());
    };

    rate_limiter.check_fallback(FallbackKind::Search)?;

    let adapter = registry
        .enabled_sorted()
        .into_iter()
        .find(|a| a.descriptor().provider_name == binding.provider)
        .ok_or_else(|| GatewayError::NotFound(format!("adapter {} not registered", binding.provider)))?;

    let provider_episode_id = binding
        .provider_episode_id
        .clone()
        .ok_or_else(|| GatewayError::Inconsistent(format!("episode {episode_id} binding has no provider episode id")))?;

    let raw = adapter.get_comments(&provider_episode_id, None).await?;
    let comments: Vec<Comment> = raw
        .into_iter()
        .enumerate()
        .map(|(idx, r)| Comment {
            id: episode_id * 1_000_000 + idx as i64,
            episode_id,
            time_sec: r.time_sec,
            mode: r.mode,
            color: r.color,
            text: r.text,
            provider_tag: Some(format!("[{}]", binding.provider)),
        })
        .collect();

    cache.set(&cache_key, &comments, COMMENTS_CACHE_TTL).await?;
    repo.store_comments(&comments).await?;

    Ok(comments)
}

/// Submit a fire-and-forget fetch of the next episode's comments so
/// they're warm in cache by the time a player requests them.
pub fn predownload_next_episode(
    task_manager: Arc<TaskManager>,
    registry: Arc<AdapterRegistry>,
    provider: String,
    media_id: String,
    provider_episode_id: String,
    next_index: i32,
) {
    let unique_key = format!("predownload_{provider}_{media_id}_{next_index}");
    let title = format!("pre-download {provider}/{media_id} ep {next_index}");
    tokio::spawn(async move {
        let factory: danmaku_tasks::TaskFactory = Box::new(move |_progress, _cancel| {
            Box::pin(async move {
                let Some(adapter) = registry
                    .enabled_sorted()
                    .into_iter()
                    .find(|a| a.descriptor().provider_name == provider)
                else {
                    return Err(format!("adapter {provider} not registered"));
                };
                adapter
                    .get_comments(&provider_episode_id, None)
                    .await
                    .map(|raw| format!("pre-downloaded {} comments", raw.len()))
                    .map_err(|e| e.to_string())
            })
        });

        let _ = task_manager
            .submit_task(SubmitTask {
                factory,
                title,
                unique_key: Some(unique_key),
                queue_type: QueueType::Fallback,
                task_type: Some("preDownload".to_string()),
                run_immediately: true,
                scheduled_task_id: None,
            })
            .await;
    });
}
