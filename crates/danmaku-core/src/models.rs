//! Entity types backing the platform's data model.
//!
//! Ownership chain: `Anime` owns `AnimeSource`s which own `Episode`s which
//! own `Comment`s; deletion cascades along this chain. `RateLimitState`,
//! `CacheEntry`, `TaskHistory`, and `ScheduledTask` are process-wide
//! singletons indexed by their natural keys and are modeled in their own
//! crates (`danmaku-ratelimit`, `danmaku-cache`, `danmaku-tasks`,
//! `danmaku-scheduler`) rather than here, since those crates own their
//! lifecycle independently of the content graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of content an `Anime` row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TvSeries,
    Movie,
    Ova,
    Other,
}

impl ContentType {
    /// The external dandanplay `type` field for this content type.
    pub fn dandan_type(&self) -> &'static str {
        match self {
            ContentType::TvSeries => "tvseries",
            ContentType::Movie => "movie",
            ContentType::Ova => "ova",
            ContentType::Other => "other",
        }
    }

    /// The external dandanplay `typeDescription` prefix for this type.
    pub fn dandan_type_description(&self) -> &'static str {
        match self {
            ContentType::TvSeries => "TV动画",
            ContentType::Movie => "电影/剧场版",
            ContentType::Ova => "OVA",
            ContentType::Other => "其他",
        }
    }
}

/// A canonical title in the local library.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Anime {
    pub id: i64,
    pub title: String,
    pub season: i32,
    pub content_type: ContentType,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub tmdb_id: Option<String>,
    pub tmdb_episode_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One provider-backed source feeding episodes into an `Anime`.
///
/// Invariant: `(anime_id, provider_name, media_id)` is unique; at most one
/// row per `anime_id` has `is_favorited = true`, and at most one has
/// `incremental_refresh_enabled = true`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnimeSource {
    pub id: i64,
    pub anime_id: i64,
    pub provider_name: String,
    pub media_id: String,
    pub source_order: i32,
    pub is_favorited: bool,
    pub incremental_refresh_enabled: bool,
    pub last_refresh_latest_episode_at: Option<DateTime<Utc>>,
    pub incremental_refresh_failures: i32,
}

/// A single episode within an `AnimeSource`.
///
/// `episode_index` is unique per source but not necessarily unique across
/// sources of the same `Anime` (each source has its own numbering).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Episode {
    pub id: i64,
    pub source_id: i64,
    pub episode_index: i32,
    pub title: String,
    pub source_url: Option<String>,
    pub provider_episode_id: Option<String>,
    pub comment_count: i32,
}

/// A single danmaku comment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub episode_id: i64,
    pub time_sec: f64,
    pub mode: i32,
    pub color: i32,
    pub text: String,
    pub provider_tag: Option<String>,
}

impl Comment {
    /// Render the dandanplay `p` attribute: `time,mode,color[,source_tag]`,
    /// with the font-size component stripped per the external schema.
    pub fn p_attribute(&self) -> String {
        match &self.provider_tag {
            Some(tag) if !tag.is_empty() => {
                format!("{:.2},{},{}", self.time_sec, self.mode, self.color)
                    + &format!(",{tag}")
            }
            _ => format!("{:.2},{},{}", self.time_sec, self.mode, self.color),
        }
    }
}

/// Reconciles aired order with a curated "season" order from a metadata
/// provider's episode group.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TmdbEpisodeMapping {
    pub tmdb_tv_id: i64,
    pub group_id: String,
    pub group_season: i32,
    pub group_episode: i32,
    pub tmdb_season: i32,
    pub tmdb_episode: i32,
}

/// An opaque API token consumed by media players.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiToken {
    pub token: String,
    pub name: String,
    pub is_enabled: bool,
    /// -1 means unlimited.
    pub daily_call_limit: i64,
    pub validity_period: Option<DateTime<Utc>>,
    pub counter: i64,
}

impl ApiToken {
    /// Whether this token may currently be used: enabled, not expired,
    /// and under its daily call limit.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_enabled {
            return false;
        }
        if let Some(expiry) = self.validity_period {
            if now > expiry {
                return false;
            }
        }
        self.daily_call_limit < 0 || self.counter < self.daily_call_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_p_attribute_without_tag() {
        let c = Comment {
            id: 1,
            episode_id: 2,
            time_sec: 12.345,
            mode: 1,
            color: 0xFFFFFF,
            text: "hi".into(),
            provider_tag: None,
        };
        assert_eq!(c.p_attribute(), "12.35,1,16777215");
    }

    #[test]
    fn comment_p_attribute_with_tag() {
        let c = Comment {
            id: 1,
            episode_id: 2,
            time_sec: 1.0,
            mode: 1,
            color: 0,
            text: "hi".into(),
            provider_tag: Some("[bilibili]".into()),
        };
        assert_eq!(c.p_attribute(), "1.00,1,0,[bilibili]");
    }

    #[test]
    fn token_usable_respects_expiry_and_limit() {
        let now = Utc::now();
        let mut token = ApiToken {
            token: "t".into(),
            name: "n".into(),
            is_enabled: true,
            daily_call_limit: 5,
            validity_period: Some(now + chrono::Duration::hours(1)),
            counter: 5,
        };
        assert!(!token.is_usable(now), "at limit should be unusable");
        token.counter = 4;
        assert!(token.is_usable(now));
        token.validity_period = Some(now - chrono::Duration::hours(1));
        assert!(!token.is_usable(now), "expired should be unusable");
    }

    #[test]
    fn unlimited_token_ignores_counter() {
        let token = ApiToken {
            token: "t".into(),
            name: "n".into(),
            is_enabled: true,
            daily_call_limit: -1,
            validity_period: None,
            counter: 1_000_000,
        };
        assert!(token.is_usable(Utc::now()));
    }
}
