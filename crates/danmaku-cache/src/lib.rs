//! # Danmaku Gateway Cache
//!
//! C2: the TTL key/value cache backing search sessions, virtual-id
//! bindings, sampled comment buffers, and per-token cooldowns.
//!
//! [`CacheStore`] is the trait every caller depends on; [`RedisCacheStore`]
//! is the production implementation and [`MemoryCacheStore`] is a
//! single-process stand-in used in tests and in any deployment that
//! chooses not to run Redis. Both honor the same [`prefixes`] namespace
//! contract so cache keys remain interchangeable across processes.

pub mod prefixes;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use danmaku_core::{GatewayError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

/// A TTL-scoped key/value cache.
///
/// Implementations store values as JSON so callers can cache arbitrary
/// serializable structures without the store needing to know their shape.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get_raw(key).await?.is_some())
    }
    /// List keys matching a `prefix*` glob. Used by admin tooling and by
    /// prefix-scoped invalidation; not on any hot path.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        let mut deleted = 0;
        for key in keys {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Typed convenience wrapper over any [`CacheStore`].
#[async_trait]
pub trait CacheStoreExt: CacheStore {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| GatewayError::Inconsistent(format!("corrupt cache value at {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| GatewayError::Inconsistent(format!("cannot serialize cache value for {key}: {e}")))?;
        self.set_raw(key, raw, ttl).await
    }
}

impl<T: CacheStore + ?Sized> CacheStoreExt for T {}

/// `get_or_set` with single-flight semantics: concurrent callers racing
/// on the same key block on one shared lock and only the first actually
/// invokes `factory`, mirroring the double-checked lock pattern used for
/// the platform's on-disk cache manager.
pub struct SingleFlightCache<S: CacheStore> {
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: CacheStore> SingleFlightCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch `key`, or build it with `factory` and cache it for `ttl`.
    /// Two concurrent calls for the same key that both miss will only
    /// run `factory` once.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(hit) = self.store.get::<T>(key).await? {
            return Ok(hit);
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        if let Some(hit) = self.store.get::<T>(key).await? {
            return Ok(hit);
        }

        let value = factory().await?;
        self.store.set(key, &value, ttl).await?;
        Ok(value)
    }
}

/// A process-local, non-persistent [`CacheStore`] for tests and
/// single-process deployments.
#[derive(Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, (String, std::time::Instant, Duration)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(inserted: std::time::Instant, ttl: Duration) -> bool {
        inserted.elapsed() >= ttl
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) => {
                let (value, inserted, ttl) = entry.value().clone();
                if Self::is_expired(inserted, ttl) {
                    drop(entry);
                    self.entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value, std::time::Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}

/// A Redis-backed [`CacheStore`] shared by every process in the
/// deployment, so cache-key prefixes are a contract rather than an
/// implementation detail.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis client: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis connect: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis get {key}: {e}")))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis set {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis del {key}: {e}")))?;
        Ok(deleted > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(format!("redis keys {prefix}*: {e}")))
    }
}
