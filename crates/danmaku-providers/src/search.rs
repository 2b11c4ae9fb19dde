//! Fan-out (`search_all`) and sequential (`search_sequentially`) search
//! dispatch across the registry's enabled, verified adapters.

use std::collections::HashSet;

use danmaku_core::Result;
use regex::Regex;

use crate::adapter::{EpisodeQuery, ProviderSearchInfo};
use crate::registry::AdapterRegistry;

/// Fan out `keyword` (and any additional alias keywords) across every
/// enabled adapter, de-duplicate hits sharing `(provider, media_id)`,
/// then drop anything matching the global CN/EN blacklist regexes.
pub async fn search_all(
    registry: &AdapterRegistry,
    keywords: &[String],
    episode_info: Option<&EpisodeQuery>,
    blacklist_cn: Option<&Regex>,
    blacklist_eng: Option<&Regex>,
) -> Result<Vec<ProviderSearchInfo>> {
    let adapters = registry.enabled_sorted();
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for adapter in &adapters {
        for keyword in keywords {
            let hits = adapter.search(keyword, episode_info).await?;
            for hit in hits {
                let key = (hit.provider.clone(), hit.media_id.clone());
                if !seen.insert(key) {
                    continue;
                }
                if is_blacklisted(&hit.title, blacklist_cn, blacklist_eng) {
                    continue;
                }
                results.push(hit);
            }
        }
    }

    Ok(results)
}

/// Iterate adapters in `display_order`, returning the first adapter's
/// non-empty result set.
pub async fn search_sequentially(
    registry: &AdapterRegistry,
    keyword: &str,
    episode_info: Option<&EpisodeQuery>,
) -> Result<Vec<ProviderSearchInfo>> {
    for adapter in registry.enabled_sorted() {
        let hits = adapter.search(keyword, episode_info).await?;
        if !hits.is_empty() {
            return Ok(hits);
        }
    }
    Ok(Vec::new())
}

fn is_blacklisted(title: &str, blacklist_cn: Option<&Regex>, blacklist_eng: Option<&Regex>) -> bool {
    blacklist_cn.map(|re| re.is_match(title)).unwrap_or(false)
        || blacklist_eng.map(|re| re.is_match(title)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterDescriptor, MediaKind, ProviderEpisodeInfo, RawComment, ScraperAdapter};
    use crate::registry::AdapterSettings;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedAdapter {
        descriptor: AdapterDescriptor,
        hits: Vec<ProviderSearchInfo>,
    }

    #[async_trait]
    impl ScraperAdapter for FixedAdapter {
        fn descriptor(&self) -> &AdapterDescriptor {
            &self.descriptor
        }

        async fn search(&self, _keyword: &str, _episode_info: Option<&EpisodeQuery>) -> Result<Vec<ProviderSearchInfo>> {
            Ok(self.hits.clone())
        }

        async fn get_episodes(&self, _media_id: &str, _db_media_type: Option<MediaKind>) -> Result<Vec<ProviderEpisodeInfo>> {
            Ok(vec![])
        }

        async fn get_comments(&self, _episode_id: &str, _progress: Option<crate::adapter::ProgressCallback>) -> Result<Vec<RawComment>> {
            Ok(vec![])
        }

        fn get_id_from_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    fn descriptor(name: &str) -> AdapterDescriptor {
        AdapterDescriptor {
            provider_name: name.to_string(),
            handled_domains: vec![],
            rate_limit_quota: None,
            configurable_fields: Default::default(),
            test_url: None,
            referer: None,
            is_loggable: false,
        }
    }

    fn hit(provider: &str, media_id: &str, title: &str) -> ProviderSearchInfo {
        ProviderSearchInfo {
            provider: provider.to_string(),
            media_id: media_id.to_string(),
            title: title.to_string(),
            kind: MediaKind::TvSeries,
            season: 1,
            year: None,
            episode_count: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn search_all_dedupes_by_provider_and_media_id() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter {
                    descriptor: descriptor("a"),
                    hits: vec![hit("a", "1", "Show")],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let results = search_all(&registry, &["Show".to_string(), "Show Alias".to_string()], None, None, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1, "same (provider, media_id) hit from two keywords should dedupe");
    }

    #[tokio::test]
    async fn search_all_drops_blacklisted_titles() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter {
                    descriptor: descriptor("a"),
                    hits: vec![hit("a", "1", "Banned Show"), hit("a", "2", "Allowed Show")],
                }),
                b"x",
                None,
                AdapterSettings::default(),
            )
            .unwrap();

        let blacklist = Regex::new("Banned").unwrap();
        let results = search_all(&registry, &["q".to_string()], None, None, Some(&blacklist))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Allowed Show");
    }

    #[tokio::test]
    async fn search_sequentially_returns_first_nonempty() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(
                Arc::new(FixedAdapter { descriptor: descriptor("empty"), hits: vec![] }),
                b"x",
                None,
                AdapterSettings { display_order: 0, ..Default::default() },
            )
            .unwrap();
        registry
            .register(
                Arc::new(FixedAdapter { descriptor: descriptor("has-hits"), hits: vec![hit("has-hits", "1", "Show")] }),
                b"x",
                None,
                AdapterSettings { display_order: 1, ..Default::default() },
            )
            .unwrap();

        let results = search_sequentially(&registry, "q", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, "has-hits");
    }
}
