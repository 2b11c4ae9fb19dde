//! The adapter registry: discovery/sync bookkeeping, signature
//! verification, and the enabled/ordered view dispatch reads from.
//!
//! Verification is grounded in the platform's existing
//! compiled-module-with-Python-fallback security core, but that
//! fallback always returned `true` regardless of the signature — a
//! stub acceptable only because the compiled module was the real gate
//! in production. This port has no compiled-module split, so it always
//! performs real verification: RSA-PSS over SHA-256 against an
//! embedded public key. There is no insecure fallback path.

use std::sync::Arc;

use danmaku_core::{GatewayError, Result};
use parking_lot::RwLock;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

use crate::adapter::ScraperAdapter;

/// Per-adapter settings persisted alongside the registry (mirrors the
/// `scraper_settings` table).
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub is_enabled: bool,
    pub display_order: i32,
    pub use_proxy: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            is_enabled: true,
            display_order: 0,
            use_proxy: false,
        }
    }
}

struct Registration {
    adapter: Arc<dyn ScraperAdapter>,
    settings: AdapterSettings,
    /// Forced to false for any adapter that fails signature
    /// verification, regardless of `settings.is_enabled`.
    verified: bool,
}

/// Verify a detached RSA-PSS/SHA-256 signature over `data` against
/// `public_key`. `signature` is the raw signature bytes.
pub fn verify_signature(data: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let Ok(sig) = Signature::try_from(signature) else {
        return false;
    };
    verifying_key.verify(data, &sig).is_ok()
}

/// Holds every known adapter plus its enable/order/proxy settings, and
/// exposes the verified + enabled + ordered view the search dispatch
/// methods depend on.
pub struct AdapterRegistry {
    registrations: RwLock<Vec<Registration>>,
    public_key: Option<RsaPublicKey>,
    verification_enabled: bool,
}

impl AdapterRegistry {
    pub fn new(public_key: Option<RsaPublicKey>, verification_enabled: bool) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            public_key,
            verification_enabled,
        }
    }

    /// Register (or re-register) an adapter. `signed_payload` is the
    /// adapter's canonical bytes (e.g. its compiled artifact or source)
    /// and `signature` its detached signature; both are required when
    /// verification is enabled. An adapter that fails verification is
    /// registered but forced disabled — it never participates in
    /// search dispatch until re-registered with a valid signature.
    pub fn register(
        &self,
        adapter: Arc<dyn ScraperAdapter>,
        signed_payload: &[u8],
        signature: Option<&[u8]>,
        settings: AdapterSettings,
    ) -> Result<()> {
        let verified = if !self.verification_enabled {
            true
        } else {
            match (&self.public_key, signature) {
                (Some(key), Some(sig)) => verify_signature(signed_payload, sig, key),
                _ => false,
            }
        };

        if !verified {
            tracing::warn!(
                provider = %adapter.descriptor().provider_name,
                "adapter failed signature verification; forcing disabled"
            );
        }

        let mut settings = settings;
        if !verified {
            settings.is_enabled = false;
        }

        let provider_name = adapter.descriptor().provider_name.clone();
        let mut registrations = self.registrations.write();
        registrations.retain(|r| r.adapter.descriptor().provider_name != provider_name);
        registrations.push(Registration {
            adapter,
            settings,
            verified,
        });
        Ok(())
    }

    /// Remove adapters no longer discovered on disk, keeping only the
    /// ones named in `present_providers`.
    pub fn prune_stale(&self, present_providers: &[String]) {
        self.registrations
            .write()
            .retain(|r| present_providers.contains(&r.adapter.descriptor().provider_name));
    }

    pub fn set_enabled(&self, provider: &str, enabled: bool) -> Result<()> {
        let mut registrations = self.registrations.write();
        let reg = registrations
            .iter_mut()
            .find(|r| r.adapter.descriptor().provider_name == provider)
            .ok_or_else(|| GatewayError::NotFound(format!("adapter {provider} not registered")))?;
        if !reg.verified && enabled {
            return Err(GatewayError::Fatal(format!(
                "adapter {provider} failed verification and cannot be enabled"
            )));
        }
        reg.settings.is_enabled = enabled;
        Ok(())
    }

    pub fn set_display_order(&self, provider: &str, order: i32) -> Result<()> {
        let mut registrations = self.registrations.write();
        let reg = registrations
            .iter_mut()
            .find(|r| r.adapter.descriptor().provider_name == provider)
            .ok_or_else(|| GatewayError::NotFound(format!("adapter {provider} not registered")))?;
        reg.settings.display_order = order;
        Ok(())
    }

    /// Verified, enabled adapters sorted by `display_order`, the view
    /// every search dispatch method iterates.
    pub fn enabled_sorted(&self) -> Vec<Arc<dyn ScraperAdapter>> {
        let mut regs: Vec<_> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.verified && r.settings.is_enabled)
            .map(|r| (r.settings.display_order, r.adapter.clone()))
            .collect();
        regs.sort_by_key(|(order, _)| *order);
        regs.into_iter().map(|(_, a)| a).collect()
    }

    pub fn all_provider_names(&self) -> Vec<String> {
        self.registrations
            .read()
            .iter()
            .map(|r| r.adapter.descriptor().provider_name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterDescriptor, EpisodeQuery, MediaKind, ProviderEpisodeInfo, ProviderSearchInfo};
    use async_trait::async_trait;
    use rand::rngs::OsRng;
    use rsa::pss::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;

    struct StubAdapter {
        descriptor: AdapterDescriptor,
    }

    #[async_trait]
    impl ScraperAdapter for StubAdapter {
        fn descriptor(&self) -> &AdapterDescriptor {
            &self.descriptor
        }

        async fn search(
            &self,
            _keyword: &str,
            _episode_info: Option<&EpisodeQuery>,
        ) -> danmaku_core::Result<Vec<ProviderSearchInfo>> {
            Ok(vec![])
        }

        async fn get_episodes(
            &self,
            _media_id: &str,
            _db_media_type: Option<MediaKind>,
        ) -> danmaku_core::Result<Vec<ProviderEpisodeInfo>> {
            Ok(vec![])
        }

        async fn get_comments(
            &self,
            _episode_id: &str,
            _progress: Option<crate::adapter::ProgressCallback>,
        ) -> danmaku_core::Result<Vec<crate::adapter::RawComment>> {
            Ok(vec![])
        }

        fn get_id_from_url(&self, _url: &str) -> Option<String> {
            None
        }
    }

    fn stub(name: &str) -> Arc<dyn ScraperAdapter> {
        Arc::new(StubAdapter {
            descriptor: AdapterDescriptor {
                provider_name: name.to_string(),
                handled_domains: vec![],
                rate_limit_quota: None,
                configurable_fields: Default::default(),
                test_url: None,
                referer: None,
                is_loggable: false,
            },
        })
    }

    #[test]
    fn unverified_adapter_is_forced_disabled() {
        let registry = AdapterRegistry::new(None, true);
        registry
            .register(stub("tencent"), b"payload", None, AdapterSettings { is_enabled: true, ..Default::default() })
            .unwrap();
        assert!(registry.enabled_sorted().is_empty());
    }

    #[test]
    fn verification_disabled_treats_all_as_verified() {
        let registry = AdapterRegistry::new(None, false);
        registry
            .register(stub("tencent"), b"payload", None, AdapterSettings::default())
            .unwrap();
        assert_eq!(registry.enabled_sorted().len(), 1);
    }

    #[test]
    fn valid_signature_is_accepted_and_display_order_is_honored() {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let signing_key = SigningKey::<Sha256>::new(private_key);

        let registry = AdapterRegistry::new(Some(public_key), true);

        let payload_a = b"adapter-a-bytes";
        let sig_a = signing_key.sign_with_rng(&mut rng, payload_a);
        let sig_a_bytes = sig_a.to_bytes();
        registry
            .register(stub("a"), payload_a, Some(&sig_a_bytes), AdapterSettings { display_order: 2, ..Default::default() })
            .unwrap();

        let payload_b = b"adapter-b-bytes";
        let sig_b = signing_key.sign_with_rng(&mut rng, payload_b);
        let sig_b_bytes = sig_b.to_bytes();
        registry
            .register(stub("b"), payload_b, Some(&sig_b_bytes), AdapterSettings { display_order: 1, ..Default::default() })
            .unwrap();

        let ordered = registry.enabled_sorted();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].descriptor().provider_name, "b");
        assert_eq!(ordered[1].descriptor().provider_name, "a");
    }

    #[test]
    fn set_enabled_refuses_unverified_adapter() {
        let registry = AdapterRegistry::new(None, true);
        registry
            .register(stub("tencent"), b"payload", None, AdapterSettings::default())
            .unwrap();
        assert!(registry.set_enabled("tencent", true).is_err());
    }

    #[test]
    fn prune_stale_removes_adapters_not_in_present_list() {
        let registry = AdapterRegistry::new(None, false);
        registry.register(stub("a"), b"x", None, AdapterSettings::default()).unwrap();
        registry.register(stub("b"), b"x", None, AdapterSettings::default()).unwrap();
        registry.prune_stale(&["a".to_string()]);
        assert_eq!(registry.all_provider_names(), vec!["a".to_string()]);
    }
}
