//! Wire-shape DTOs for the dandanplay-compatible surface. Field names
//! follow the external protocol's camelCase exactly; these are kept
//! separate from the internal `danmaku_core::models` rows so protocol
//! churn never leaks into the content graph.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeDto {
    #[serde(rename = "episodeId")]
    pub episode_id: i64,
    #[serde(rename = "episodeTitle")]
    pub episode_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnimeDto {
    #[serde(rename = "animeId")]
    pub anime_id: i64,
    #[serde(rename = "animeTitle")]
    pub anime_title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "typeDescription")]
    pub type_description: String,
    pub episodes: Vec<EpisodeDto>,
}

#[derive(Debug, Serialize)]
pub struct SearchEpisodesResponse {
    pub success: bool,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    pub animes: Vec<AnimeDto>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchAnimeItem {
    #[serde(rename = "animeId")]
    pub anime_id: i64,
    #[serde(rename = "bangumiId")]
    pub bangumi_id: String,
    #[serde(rename = "animeTitle")]
    pub anime_title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "typeDescription")]
    pub type_description: String,
    pub year: Option<i32>,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchAnimeResponse {
    pub success: bool,
    pub animes: Vec<SearchAnimeItem>,
}

#[derive(Debug, Serialize)]
pub struct BangumiEpisode {
    #[serde(rename = "episodeId")]
    pub episode_id: i64,
    #[serde(rename = "episodeTitle")]
    pub episode_title: String,
}

#[derive(Debug, Serialize)]
pub struct BangumiDetails {
    #[serde(rename = "animeId")]
    pub anime_id: i64,
    #[serde(rename = "animeTitle")]
    pub anime_title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "typeDescription")]
    pub type_description: String,
    pub episodes: Vec<BangumiEpisode>,
}

#[derive(Debug, Serialize)]
pub struct BangumiResponse {
    pub success: bool,
    pub bangumi: BangumiDetails,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "matchMode")]
    pub match_mode: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct MatchItem {
    #[serde(rename = "episodeId")]
    pub episode_id: i64,
    #[serde(rename = "animeId")]
    pub anime_id: i64,
    #[serde(rename = "animeTitle")]
    pub anime_title: String,
    #[serde(rename = "episodeTitle")]
    pub episode_title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "typeDescription")]
    pub type_description: String,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    #[serde(rename = "isMatched")]
    pub is_matched: bool,
    pub matches: Vec<MatchItem>,
}

#[derive(Debug, Deserialize)]
pub struct MatchBatchRequest {
    pub requests: Vec<MatchRequest>,
}

#[derive(Debug, Serialize)]
pub struct MatchBatchResponse {
    pub success: bool,
    pub results: Vec<MatchResponse>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommentItem {
    pub cid: i64,
    pub p: String,
    pub m: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub success: bool,
    pub count: usize,
    pub comments: Vec<CommentItem>,
}
