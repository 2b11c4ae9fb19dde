//! C1: the key/value Config Store.
//!
//! Two layers:
//!
//! - Bootstrap settings (database URL, redis URL, bind address, the
//!   shared verification key path) are process environment, loaded once
//!   at startup via the `config` crate and `dotenvy`.
//! - Everything else named in the external schema (`searchFallbackEnabled`,
//!   `matchFallbackTokens`, `aiApiKey`, ...) lives in the `config_entry`
//!   table and is read through [`ConfigStore`], which caches entries in
//!   memory and only re-queries the database after an explicit
//!   invalidation (an admin write through this same store, or an
//!   external signal on restart).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::PgPool;

use crate::{GatewayError, Result};

/// Bootstrap settings read once from the environment at process start.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub database_url: String,
    pub redis_url: String,
    pub bind_address: String,
    pub verification_key_path: Option<String>,
}

impl BootstrapSettings {
    /// Load bootstrap settings from a `.env` file (if present) layered
    /// under process environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let builder = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:7768")
            .map_err(|e| GatewayError::InputInvalid(e.to_string()))?
            .add_source(config::Environment::default().try_parsing(true));
        let raw = builder
            .build()
            .map_err(|e| GatewayError::InputInvalid(e.to_string()))?;

        let database_url = raw
            .get_string("database_url")
            .map_err(|_| GatewayError::InputInvalid("DATABASE_URL is required".into()))?;
        let redis_url = raw
            .get_string("redis_url")
            .map_err(|_| GatewayError::InputInvalid("REDIS_URL is required".into()))?;
        let bind_address = raw
            .get_string("bind_address")
            .unwrap_or_else(|_| "0.0.0.0:7768".to_string());
        let verification_key_path = raw.get_string("verification_key_path").ok();

        Ok(Self {
            database_url,
            redis_url,
            bind_address,
            verification_key_path,
        })
    }
}

/// A registered default for a config key, surfaced to the admin UI with
/// a human label.
#[derive(Debug, Clone)]
pub struct ConfigDefault {
    pub key: &'static str,
    pub default_value: &'static str,
    pub label: &'static str,
}

/// The full set of dynamic keys the platform reads through the Config
/// Store, with their registered defaults.
pub const REGISTERED_DEFAULTS: &[ConfigDefault] = &[
    ConfigDefault { key: "searchFallbackEnabled", default_value: "true", label: "Enable search fallback" },
    ConfigDefault { key: "matchFallbackEnabled", default_value: "true", label: "Enable match fallback" },
    ConfigDefault { key: "matchFallbackTokens", default_value: "[]", label: "Tokens authorized for match fallback" },
    ConfigDefault { key: "matchFallbackBlacklist", default_value: "", label: "Filename blacklist regex" },
    ConfigDefault { key: "preDownloadNextEpisodeEnabled", default_value: "true", label: "Pre-download next episode" },
    ConfigDefault { key: "externalApiFallbackEnabled", default_value: "true", label: "Allow external API fallback" },
    ConfigDefault { key: "aiMatchEnabled", default_value: "false", label: "Enable AI-assisted match selection" },
    ConfigDefault { key: "aiProvider", default_value: "", label: "AI provider name" },
    ConfigDefault { key: "aiApiKey", default_value: "", label: "AI provider API key" },
    ConfigDefault { key: "aiBaseUrl", default_value: "", label: "AI provider base URL" },
    ConfigDefault { key: "aiModel", default_value: "", label: "AI provider model name" },
    ConfigDefault { key: "aiFallbackEnabled", default_value: "false", label: "Fall back to heuristic selection on AI failure" },
    ConfigDefault { key: "danmakuOutputLimitPerSource", default_value: "-1", label: "Max comments served per source (-1 = unlimited)" },
    ConfigDefault { key: "uaFilterMode", default_value: "off", label: "User-Agent filter mode" },
    ConfigDefault { key: "trustedProxies", default_value: "[]", label: "Trusted reverse-proxy CIDRs" },
    ConfigDefault { key: "webhookEnabled", default_value: "false", label: "Enable webhook ingestion" },
    ConfigDefault { key: "scraperVerificationEnabled", default_value: "true", label: "Verify adapter signatures" },
    ConfigDefault { key: "search_result_global_blacklist_cn", default_value: "", label: "CN title blacklist regex" },
    ConfigDefault { key: "search_result_global_blacklist_eng", default_value: "", label: "EN title blacklist regex" },
];

/// Cached, database-backed key/value configuration store.
///
/// Reads are served from an in-memory map guarded by a `parking_lot`
/// lock; a miss falls through to the database and, if the key is
/// registered, to its default. Writes go straight to the database and
/// update the cache in the same critical section so no reader ever
/// observes a write that hasn't landed.
#[derive(Clone)]
pub struct ConfigStore {
    pool: PgPool,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl ConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build a store over a lazily-connecting pool: no connection is
    /// attempted until the first query. Used by tests and any caller
    /// that only exercises registered-default fallbacks.
    pub fn new_unconnected() -> Self {
        let pool = PgPool::connect_lazy("postgres://localhost/unconnected")
            .expect("lazy pool construction never touches the network");
        Self::new(pool)
    }

    fn registered_default(key: &str) -> Option<&'static str> {
        REGISTERED_DEFAULTS
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.default_value)
    }

    /// Read a config value, consulting the cache before the database.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.read().get(key).cloned() {
            return Ok(Some(hit));
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config_entry WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let value = match row {
            Some((v,)) => Some(v),
            None => Self::registered_default(key).map(str::to_string),
        };

        if let Some(v) = &value {
            self.cache.write().insert(key.to_string(), v.clone());
        }
        Ok(value)
    }

    /// Read a config value, falling back to `default` if unset.
    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    /// Read a boolean-valued key (`"true"`/`"1"` => true).
    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).await? {
            Some(v) => Ok(v.eq_ignore_ascii_case("true") || v == "1"),
            None => Ok(default),
        }
    }

    /// Write a config value, invalidating (really: updating) the cache
    /// atomically with the database write.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config_entry (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        self.cache.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Drop a key from the cache without touching the database, for
    /// tests or external invalidation signals.
    pub fn invalidate(&self, key: &str) {
        self.cache.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_defaults_cover_spec_keys() {
        let keys: Vec<&str> = REGISTERED_DEFAULTS.iter().map(|d| d.key).collect();
        for expected in [
            "searchFallbackEnabled",
            "matchFallbackEnabled",
            "matchFallbackTokens",
            "aiMatchEnabled",
            "uaFilterMode",
            "scraperVerificationEnabled",
        ] {
            assert!(keys.contains(&expected), "missing default for {expected}");
        }
    }

    #[test]
    fn registered_default_lookup() {
        assert_eq!(
            ConfigStore::registered_default("searchFallbackEnabled"),
            Some("true")
        );
        assert_eq!(ConfigStore::registered_default("not_a_real_key"), None);
    }
}
