//! The shared application state every route handler reads: the single
//! place that wires together C1-C8 for the HTTP surface.

use std::sync::Arc;

use danmaku_cache::MemoryCacheStore;
use danmaku_core::config::ConfigStore;
use danmaku_fallback::{InMemoryLibraryRepository, LibraryRepository, VirtualIdMinter};
use danmaku_metadata::MetadataRegistry;
use danmaku_providers::AdapterRegistry;
use danmaku_ratelimit::RateLimiter;
use danmaku_tasks::TaskManager;

use crate::metrics::Metrics;
use crate::token_repository::TokenRepository;

/// Everything a request handler needs, held behind `Arc` and cloned
/// into every worker (actix-web's per-thread app factory model).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub cache: Arc<MemoryCacheStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub adapters: Arc<AdapterRegistry>,
    pub metadata: Arc<MetadataRegistry>,
    pub library: Arc<dyn LibraryRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub virtual_ids: Arc<VirtualIdMinter>,
    pub task_manager: Arc<TaskManager>,
    pub trusted_proxies: Arc<Vec<ipnetwork::IpNetwork>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Build an all-in-memory state graph, used by integration tests
    /// and any deployment that opts out of Redis/Postgres.
    #[cfg(test)]
    pub fn in_memory_for_tests() -> Self {
        use crate::token_repository::InMemoryTokenRepository;
        use danmaku_ratelimit::ProviderQuota;
        use std::time::Duration;

        struct NoQuota;
        impl ProviderQuota for NoQuota {
            fn quota_for(&self, _provider: &str) -> Option<u64> {
                None
            }
        }

        Self {
            config: Arc::new(ConfigStore::new_unconnected()),
            cache: Arc::new(MemoryCacheStore::new()),
            rate_limiter: Arc::new(RateLimiter::new(
                10_000,
                Duration::from_secs(60),
                Duration::from_secs(60),
                10_000,
                Duration::from_secs(60),
                Box::new(NoQuota),
            )),
            adapters: Arc::new(AdapterRegistry::new(None, false)),
            metadata: Arc::new(MetadataRegistry::new()),
            library: Arc::new(InMemoryLibraryRepository::new()),
            tokens: Arc::new(InMemoryTokenRepository::new()),
            virtual_ids: Arc::new(VirtualIdMinter::new()),
            task_manager: Arc::new(TaskManager::new(
                Arc::new(danmaku_tasks::InMemoryTaskHistoryRepository::new()),
                Default::default(),
            )),
            trusted_proxies: Arc::new(Vec::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }
}
