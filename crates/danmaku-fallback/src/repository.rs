//! Library persistence the fallback engine reads and writes: next-id
//! allocation, `create_if_not_exists` materialization of fallback
//! results, and comment storage. Distinct from `danmaku-tasks`'s
//! `TaskHistoryRepository` — this is the content graph itself.

use async_trait::async_trait;
use danmaku_core::models::{Anime, AnimeSource, Comment, Episode};
use danmaku_core::Result;
use sqlx::PgPool;

#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn find_anime_by_title_season(&self, title: &str, season: i32) -> Result<Option<Anime>>;
    async fn find_anime_by_id(&self, anime_id: i64) -> Result<Option<Anime>>;
    async fn next_anime_id(&self) -> Result<i64>;
    async fn create_anime_if_not_exists(&self, anime: &Anime) -> Result<Anime>;

    async fn find_source(&self, anime_id: i64, provider: &str, media_id: &str) -> Result<Option<AnimeSource>>;
    async fn next_source_order(&self, anime_id: i64) -> Result<i32>;
    async fn create_source_if_not_exists(&self, source: &AnimeSource) -> Result<AnimeSource>;

    /// Library rows whose title contains `keyword` (case-insensitive),
    /// for the free-text `/search/anime` surface.
    async fn search_anime_by_title(&self, keyword: &str) -> Result<Vec<Anime>>;

    async fn find_sources(&self, anime_id: i64) -> Result<Vec<AnimeSource>>;

    async fn find_episode(&self, source_id: i64, episode_index: i32) -> Result<Option<Episode>>;
    async fn create_episode_if_not_exists(&self, episode: &Episode) -> Result<Episode>;
    async fn find_episode_by_id(&self, episode_id: i64) -> Result<Option<Episode>>;
    async fn list_episodes(&self, source_id: i64) -> Result<Vec<Episode>>;

    async fn find_comments(&self, episode_id: i64) -> Result<Vec<Comment>>;
    async fn store_comments(&self, comments: &[Comment]) -> Result<()>;

    /// Resync the `anime.id` sequence generator after a gap-id reuse
    /// (e.g. `MAX(id)+1` allocation bypassing the sequence).
    async fn sync_anime_id_sequence(&self) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryLibraryRepository {
    animes: parking_lot::RwLock<Vec<Anime>>,
    sources: parking_lot::RwLock<Vec<AnimeSource>>,
    episodes: parking_lot::RwLock<Vec<Episode>>,
    comments: parking_lot::RwLock<Vec<Comment>>,
}

impl InMemoryLibraryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn find_anime_by_title_season(&self, title: &str, season: i32) -> Result<Option<Anime>> {
        Ok(self
            .animes
            .read()
            .iter()
            .find(|a| a.title == title && a.season == season)
            .cloned())
    }

    async fn find_anime_by_id(&self, anime_id: i64) -> Result<Option<Anime>> {
        Ok(self.animes.read().iter().find(|a| a.id == anime_id).cloned())
    }

    async fn next_anime_id(&self) -> Result<i64> {
        Ok(self.animes.read().iter().map(|a| a.id).max().unwrap_or(0) + 1)
    }

    async fn create_anime_if_not_exists(&self, anime: &Anime) -> Result<Anime> {
        let mut animes = self.animes.write();
        if let Some(existing) = animes.iter().find(|a| a.id == anime.id) {
            return Ok(existing.clone());
        }
        animes.push(anime.clone());
        Ok(anime.clone())
    }

    async fn search_anime_by_title(&self, keyword: &str) -> Result<Vec<Anime>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .animes
            .read()
            .iter()
            .filter(|a| a.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn find_sources(&self, anime_id: i64) -> Result<Vec<AnimeSource>> {
        Ok(self.sources.read().iter().filter(|s| s.anime_id == anime_id).cloned().collect())
    }

    async fn find_source(&self, anime_id: i64, provider: &str, media_id: &str) -> Result<Option<AnimeSource>> {
        Ok(self
            .sources
            .read()
            .iter()
            .find(|s| s.anime_id == anime_id && s.provider_name == provider && s.media_id == media_id)
            .cloned())
    }

    async fn next_source_order(&self, anime_id: i64) -> Result<i32> {
        Ok(self
            .sources
            .read()
            .iter()
            .filter(|s| s.anime_id == anime_id)
            .map(|s| s.source_order)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0))
    }

    async fn create_source_if_not_exists(&self, source: &AnimeSource) -> Result<AnimeSource> {
        let mut sources = self.sources.write();
        if let Some(existing) = sources.iter().find(|s| s.id == source.id) {
            return Ok(existing.clone());
        }
        sources.push(source.clone());
        Ok(source.clone())
    }

    async fn find_episode(&self, source_id: i64, episode_index: i32) -> Result<Option<Episode>> {
        Ok(self
            .episodes
            .read()
            .iter()
            .find(|e| e.source_id == source_id && e.episode_index == episode_index)
            .cloned())
    }

    async fn create_episode_if_not_exists(&self, episode: &Episode) -> Result<Episode> {
        let mut episodes = self.episodes.write();
        if let Some(existing) = episodes
            .iter()
            .find(|e| e.source_id == episode.source_id && e.episode_index == episode.episode_index)
        {
            return Ok(existing.clone());
        }
        episodes.push(episode.clone());
        Ok(episode.clone())
    }

    async fn find_episode_by_id(&self, episode_id: i64) -> Result<Option<Episode>> {
        Ok(self.episodes.read().iter().find(|e| e.id == episode_id).cloned())
    }

    async fn list_episodes(&self, source_id: i64) -> Result<Vec<Episode>> {
        Ok(self.episodes.read().iter().filter(|e| e.source_id == source_id).cloned().collect())
    }

    async fn find_comments(&self, episode_id: i64) -> Result<Vec<Comment>> {
        Ok(self
            .comments
            .read()
            .iter()
            .filter(|c| c.episode_id == episode_id)
            .cloned()
            .collect())
    }

    async fn store_comments(&self, comments: &[Comment]) -> Result<()> {
        self.comments.write().extend_from_slice(comments);
        Ok(())
    }

    async fn sync_anime_id_sequence(&self) -> Result<()> {
        Ok(())
    }
}

pub struct PgLibraryRepository {
    pool: PgPool,
}

impl PgLibraryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryRepository for PgLibraryRepository {
    async fn find_anime_by_title_season(&self, title: &str, season: i32) -> Result<Option<Anime>> {
        let row = sqlx::query_as::<_, Anime>("SELECT * FROM anime WHERE title = $1 AND season = $2")
            .bind(title)
            .bind(season)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_anime_by_id(&self, anime_id: i64) -> Result<Option<Anime>> {
        let row = sqlx::query_as::<_, Anime>("SELECT * FROM anime WHERE id = $1")
            .bind(anime_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn next_anime_id(&self) -> Result<i64> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM anime")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn create_anime_if_not_exists(&self, anime: &Anime) -> Result<Anime> {
        sqlx::query(
            "INSERT INTO anime (id, title, season, content_type, year, image_url, tmdb_id, tmdb_episode_group_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(anime.id)
        .bind(&anime.title)
        .bind(anime.season)
        .bind(anime.content_type)
        .bind(anime.year)
        .bind(&anime.image_url)
        .bind(&anime.tmdb_id)
        .bind(&anime.tmdb_episode_group_id)
        .bind(anime.created_at)
        .execute(&self.pool)
        .await?;
        self.find_anime_by_id(anime.id)
            .await?
            .ok_or_else(|| danmaku_core::GatewayError::Inconsistent(format!("anime {} missing after insert", anime.id)))
    }

    async fn search_anime_by_title(&self, keyword: &str) -> Result<Vec<Anime>> {
        let pattern = format!("%{keyword}%");
        let rows = sqlx::query_as::<_, Anime>("SELECT * FROM anime WHERE title ILIKE $1 ORDER BY title")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_sources(&self, anime_id: i64) -> Result<Vec<AnimeSource>> {
        let rows = sqlx::query_as::<_, AnimeSource>("SELECT * FROM anime_source WHERE anime_id = $1 ORDER BY source_order")
            .bind(anime_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_source(&self, anime_id: i64, provider: &str, media_id: &str) -> Result<Option<AnimeSource>> {
        let row = sqlx::query_as::<_, AnimeSource>(
            "SELECT * FROM anime_source WHERE anime_id = $1 AND provider_name = $2 AND media_id = $3",
        )
        .bind(anime_id)
        .bind(provider)
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn next_source_order(&self, anime_id: i64) -> Result<i32> {
        let (max,): (Option<i32>,) = sqlx::query_as("SELECT MAX(source_order) FROM anime_source WHERE anime_id = $1")
            .bind(anime_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    async fn create_source_if_not_exists(&self, source: &AnimeSource) -> Result<AnimeSource> {
        sqlx::query(
            "INSERT INTO anime_source (id, anime_id, provider_name, media_id, source_order, is_favorited, incremental_refresh_enabled, last_refresh_latest_episode_at, incremental_refresh_failures)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (anime_id, provider_name, media_id) DO NOTHING",
        )
        .bind(source.id)
        .bind(source.anime_id)
        .bind(&source.provider_name)
        .bind(&source.media_id)
        .bind(source.source_order)
        .bind(source.is_favorited)
        .bind(source.incremental_refresh_enabled)
        .bind(source.last_refresh_latest_episode_at)
        .bind(source.incremental_refresh_failures)
        .execute(&self.pool)
        .await?;
        self.find_source(source.anime_id, &source.provider_name, &source.media_id)
            .await?
            .ok_or_else(|| danmaku_core::GatewayError::Inconsistent("anime_source missing after insert".into()))
    }

    async fn find_episode(&self, source_id: i64, episode_index: i32) -> Result<Option<Episode>> {
        let row = sqlx::query_as::<_, Episode>("SELECT * FROM episode WHERE source_id = $1 AND episode_index = $2")
            .bind(source_id)
            .bind(episode_index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn create_episode_if_not_exists(&self, episode: &Episode) -> Result<Episode> {
        sqlx::query(
            "INSERT INTO episode (id, source_id, episode_index, title, source_url, provider_episode_id, comment_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (source_id, episode_index) DO NOTHING",
        )
        .bind(episode.id)
        .bind(episode.source_id)
        .bind(episode.episode_index)
        .bind(&episode.title)
        .bind(&episode.source_url)
        .bind(&episode.provider_episode_id)
        .bind(episode.comment_count)
        .execute(&self.pool)
        .await?;
        self.find_episode(episode.source_id, episode.episode_index)
            .await?
            .ok_or_else(|| danmaku_core::GatewayError::Inconsistent("episode missing after insert".into()))
    }

    async fn find_episode_by_id(&self, episode_id: i64) -> Result<Option<Episode>> {
        let row = sqlx::query_as::<_, Episode>("SELECT * FROM episode WHERE id = $1")
            .bind(episode_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_episodes(&self, source_id: i64) -> Result<Vec<Episode>> {
        let rows = sqlx::query_as::<_, Episode>("SELECT * FROM episode WHERE source_id = $1 ORDER BY episode_index")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_comments(&self, episode_id: i64) -> Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, Comment>("SELECT * FROM comment WHERE episode_id = $1 ORDER BY time_sec")
            .bind(episode_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn store_comments(&self, comments: &[Comment]) -> Result<()> {
        for comment in comments {
            sqlx::query(
                "INSERT INTO comment (id, episode_id, time_sec, mode, color, text, provider_tag)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(comment.id)
            .bind(comment.episode_id)
            .bind(comment.time_sec)
            .bind(comment.mode)
            .bind(comment.color)
            .bind(&comment.text)
            .bind(&comment.provider_tag)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn sync_anime_id_sequence(&self) -> Result<()> {
        sqlx::query("SELECT setval(pg_get_serial_sequence('anime', 'id'), COALESCE((SELECT MAX(id) FROM anime), 1))")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
