//! # Danmaku Gateway Metadata
//!
//! C5: the metadata source registry, parallel to the scraper adapter
//! registry (C4) but for read-only metadata lookups (TMDB, Bangumi,
//! Douban, TVDB, IMDb, 360kan). Concrete sources are out of scope —
//! only the contract and the failover hook the Scraper Adapter
//! Registry calls into when a search adapter comes back empty.

use std::sync::Arc;

use async_trait::async_trait;
use danmaku_core::Result;
use danmaku_providers::{EpisodeQuery, ProviderSearchInfo};
use parking_lot::RwLock;

/// A read-only metadata provider. Distinct from [`danmaku_providers::ScraperAdapter`]:
/// metadata sources never fetch danmaku, only descriptive/episode data
/// used to enrich or rescue a search.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Supplement a search that otherwise came back empty (or thin) for
    /// the given provider/keyword, e.g. resolving an alternate title or
    /// confirming a year/type the scraper adapter couldn't determine.
    async fn supplement_search_result(
        &self,
        provider: &str,
        keyword: &str,
        episode_info: Option<&EpisodeQuery>,
    ) -> Result<Vec<ProviderSearchInfo>>;
}

/// Holds the set of registered metadata sources and fans a failover
/// request out across all of them in parallel, merging whatever comes
/// back first/non-empty.
#[derive(Default)]
pub struct MetadataRegistry {
    sources: RwLock<Vec<Arc<dyn MetadataSource>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<dyn MetadataSource>) {
        self.sources.write().push(source);
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.source_name().to_string()).collect()
    }

    /// Run `supplement_search_result` across every registered source in
    /// parallel and concatenate whatever each one returns. A source's
    /// failure is logged and treated as an empty contribution — the
    /// spec's propagation policy never lets an upstream error fail a
    /// fallback path outright.
    pub async fn supplement_search_result(
        &self,
        provider: &str,
        keyword: &str,
        episode_info: Option<&EpisodeQuery>,
    ) -> Vec<ProviderSearchInfo> {
        let sources = self.sources.read().clone();
        let futures = sources.iter().map(|source| {
            let source = source.clone();
            let keyword = keyword.to_string();
            let provider = provider.to_string();
            let episode_info = episode_info.cloned();
            async move {
                match source
                    .supplement_search_result(&provider, &keyword, episode_info.as_ref())
                    .await
                {
                    Ok(hits) => hits,
                    Err(err) => {
                        tracing::warn!(source = source.source_name(), %err, "metadata supplement failed");
                        Vec::new()
                    }
                }
            }
        });

        futures::future::join_all(futures).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku_providers::MediaKind;

    struct AlwaysHit(&'static str);

    #[async_trait]
    impl MetadataSource for AlwaysHit {
        fn source_name(&self) -> &str {
            self.0
        }

        async fn supplement_search_result(
            &self,
            provider: &str,
            keyword: &str,
            _episode_info: Option<&EpisodeQuery>,
        ) -> Result<Vec<ProviderSearchInfo>> {
            Ok(vec![ProviderSearchInfo {
                provider: provider.to_string(),
                media_id: format!("{}-{}", self.0, keyword),
                title: keyword.to_string(),
                kind: MediaKind::TvSeries,
                season: 1,
                year: None,
                episode_count: None,
                image_url: None,
            }])
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl MetadataSource for AlwaysFails {
        fn source_name(&self) -> &str {
            "broken"
        }

        async fn supplement_search_result(
            &self,
            _provider: &str,
            _keyword: &str,
            _episode_info: Option<&EpisodeQuery>,
        ) -> Result<Vec<ProviderSearchInfo>> {
            Err(danmaku_core::GatewayError::UpstreamUnreachable("down".into()))
        }
    }

    #[tokio::test]
    async fn supplement_merges_hits_across_sources() {
        let registry = MetadataRegistry::new();
        registry.register(Arc::new(AlwaysHit("tmdb")));
        registry.register(Arc::new(AlwaysHit("bangumi")));

        let hits = registry.supplement_search_result("tencent", "Show", None).await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn a_failing_source_does_not_fail_the_others() {
        let registry = MetadataRegistry::new();
        registry.register(Arc::new(AlwaysFails));
        registry.register(Arc::new(AlwaysHit("tmdb")));

        let hits = registry.supplement_search_result("tencent", "Show", None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].provider, "tencent");
    }
}
