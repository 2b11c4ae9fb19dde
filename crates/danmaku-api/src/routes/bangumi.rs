//! `/bangumi/{bangumiId}`: resolves either a real library anime id or a
//! still-virtual id minted by search fallback (§4.5.1) into full
//! episode details.

use actix_web::web;
use danmaku_core::episode_id::is_virtual_anime_id;
use danmaku_fallback::lookup_anime;

use crate::dto::{BangumiDetails, BangumiEpisode, BangumiResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get_bangumi(state: web::Data<AppState>, path: web::Path<i64>) -> ApiResult<web::Json<BangumiResponse>> {
    let anime_id_param = path.into_inner();

    let real_anime_id = if is_virtual_anime_id(anime_id_param) {
        let binding = lookup_anime(state.cache.as_ref(), anime_id_param)
            .await
            .map_err(ApiError)?
            .ok_or_else(|| ApiError(danmaku_core::GatewayError::NotFound(format!("virtual anime {anime_id_param}"))))?;
        binding.real_anime_id
    } else {
        anime_id_param
    };

    let anime = state
        .library
        .find_anime_by_id(real_anime_id)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(danmaku_core::GatewayError::NotFound(format!("anime {real_anime_id}"))))?;

    let sources = state.library.find_sources(anime.id).await.map_err(ApiError)?;
    let mut episodes = Vec::new();
    for source in &sources {
        let source_episodes = state.library.list_episodes(source.id).await.map_err(ApiError)?;
        for ep in source_episodes {
            episodes.push(BangumiEpisode {
                episode_id: ep.id,
                episode_title: format!("第{}话 {}", ep.episode_index, ep.title),
            });
        }
    }
    episodes.sort_by_key(|e| e.episode_id);

    Ok(web::Json(BangumiResponse {
        success: true,
        bangumi: BangumiDetails {
            anime_id: anime.id,
            anime_title: anime.title,
            kind: anime.content_type.dandan_type().to_string(),
            type_description: anime.content_type.dandan_type_description().to_string(),
            episodes,
        },
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/bangumi/{bangumiId}", web::get().to(get_bangumi));
}
