//! API token persistence: existence/enabled/expiry checks and the call
//! counter every request increments (§4.6 step 4). Distinct from
//! `danmaku-fallback::LibraryRepository` — this is authorization state,
//! not content.

use async_trait::async_trait;
use danmaku_core::models::ApiToken;
use danmaku_core::Result;
use sqlx::PgPool;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn find(&self, token: &str) -> Result<Option<ApiToken>>;
    async fn increment_counter(&self, token: &str) -> Result<()>;
    async fn record_access(&self, token: &str, path: &str, status: &str, client_ip: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryTokenRepository {
    tokens: parking_lot::RwLock<Vec<ApiToken>>,
    access_log: parking_lot::RwLock<Vec<(String, String, String, String)>>,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: ApiToken) {
        self.tokens.write().push(token);
    }

    pub fn access_log_len(&self) -> usize {
        self.access_log.read().len()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn find(&self, token: &str) -> Result<Option<ApiToken>> {
        Ok(self.tokens.read().iter().find(|t| t.token == token).cloned())
    }

    async fn increment_counter(&self, token: &str) -> Result<()> {
        if let Some(row) = self.tokens.write().iter_mut().find(|t| t.token == token) {
            row.counter += 1;
        }
        Ok(())
    }

    async fn record_access(&self, token: &str, path: &str, status: &str, client_ip: &str) -> Result<()> {
        self.access_log
            .write()
            .push((token.to_string(), path.to_string(), status.to_string(), client_ip.to_string()));
        Ok(())
    }
}

pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn find(&self, token: &str) -> Result<Option<ApiToken>> {
        let row = sqlx::query_as::<_, ApiToken>("SELECT * FROM api_token WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn increment_counter(&self, token: &str) -> Result<()> {
        sqlx::query("UPDATE api_token SET counter = counter + 1 WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_access(&self, token: &str, path: &str, status: &str, client_ip: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO access_log (token, path, status, client_ip, created_at) VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(token)
        .bind(path)
        .bind(status)
        .bind(client_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(name: &str) -> ApiToken {
        ApiToken {
            token: name.to_string(),
            name: name.to_string(),
            is_enabled: true,
            daily_call_limit: -1,
            validity_period: None,
            counter: 0,
        }
    }

    #[tokio::test]
    async fn increment_counter_bumps_the_right_row() {
        let repo = InMemoryTokenRepository::new();
        repo.insert(token("a"));
        repo.insert(token("b"));
        repo.increment_counter("a").await.unwrap();
        repo.increment_counter("a").await.unwrap();
        assert_eq!(repo.find("a").await.unwrap().unwrap().counter, 2);
        assert_eq!(repo.find("b").await.unwrap().unwrap().counter, 0);
    }

    #[tokio::test]
    async fn record_access_appends_to_the_log() {
        let repo = InMemoryTokenRepository::new();
        repo.record_access("a", "/search/anime", "allowed", "1.2.3.4").await.unwrap();
        repo.record_access("a", "/match", "denied_expired", "1.2.3.4").await.unwrap();
        assert_eq!(repo.access_log_len(), 2);
    }
}
