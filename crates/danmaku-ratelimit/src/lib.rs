//! # Danmaku Gateway Rate Limiter
//!
//! C3: global, per-provider, and fallback token-window rate limiting.
//!
//! Three conceptual buckets are tracked: a single global bucket, one
//! bucket per provider (quota taken from that provider's declared
//! `rate_limit_quota`, or unlimited if absent), and a combined
//! "fallback" bucket with separate sub-counters for match and search
//! traffic. Every bucket is `(count, last_reset)`; a check first rolls
//! the window over if `now - last_reset >= period`, then evaluates.
//!
//! This does not reuse a GCRA-style limiter crate: the spec's buckets
//! are fixed-window counters with an externally observable reset
//! timestamp, not a leaky-bucket/token-bucket smoothing scheme, so a
//! small purpose-built limiter matches the contract more directly than
//! adapting a smoothing algorithm to emulate fixed windows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use danmaku_core::{GatewayError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// A fallback sub-bucket kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    Match,
    Search,
}

impl FallbackKind {
    fn label(&self) -> &'static str {
        match self {
            FallbackKind::Match => "__fallback_match__",
            FallbackKind::Search => "__fallback_search__",
        }
    }
}

const GLOBAL_BUCKET_KEY: &str = "__global__";

#[derive(Debug, Clone)]
struct Bucket {
    count: u64,
    last_reset: DateTime<Utc>,
    limit: u64,
    period: Duration,
}

impl Bucket {
    fn new(limit: u64, period: Duration) -> Self {
        Self {
            count: 0,
            last_reset: Utc::now(),
            limit,
            period,
        }
    }

    /// Roll the window over if its period has elapsed, then check and
    /// (on success) increment. Returns `Ok(())` on success or the retry
    /// delay in seconds on exhaustion.
    fn check_and_increment(&mut self, now: DateTime<Utc>) -> std::result::Result<(), u64> {
        self.maybe_reset(now);
        if self.count >= self.limit {
            let elapsed = (now - self.last_reset).num_seconds().max(0) as u64;
            let retry_after = self.period.as_secs().saturating_sub(elapsed).max(1);
            return Err(retry_after);
        }
        self.count += 1;
        Ok(())
    }

    fn maybe_reset(&mut self, now: DateTime<Utc>) {
        let elapsed = now - self.last_reset;
        if elapsed.num_milliseconds() as u64 >= self.period.as_millis() as u64 {
            self.count = 0;
            self.last_reset = now;
        }
    }

    fn bump(&mut self, now: DateTime<Utc>) {
        self.maybe_reset(now);
        self.count += 1;
    }

    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            count: self.count,
            limit: self.limit,
            last_reset: self.last_reset,
        }
    }
}

/// A point-in-time view of one bucket's counters.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub count: u64,
    pub limit: u64,
    pub last_reset: DateTime<Utc>,
}

/// Declares a provider's quota; `None` means unlimited.
pub trait ProviderQuota: Send + Sync {
    fn quota_for(&self, provider: &str) -> Option<u64>;
}

/// The rate limiter. `G`/`P` configure the global bucket, `F`/`P`
/// configure the shared-period fallback bucket; per-provider quotas are
/// resolved lazily through a [`ProviderQuota`] implementation the first
/// time each provider is checked.
pub struct RateLimiter {
    global: Mutex<Bucket>,
    provider_period: Duration,
    providers: DashMap<String, Mutex<Bucket>>,
    fallback_match: Mutex<Bucket>,
    fallback_search: Mutex<Bucket>,
    quota_source: Box<dyn ProviderQuota>,
    verification_failed: AtomicBool,
}

impl RateLimiter {
    pub fn new(
        global_limit: u64,
        global_period: Duration,
        provider_period: Duration,
        fallback_limit: u64,
        fallback_period: Duration,
        quota_source: Box<dyn ProviderQuota>,
    ) -> Self {
        Self {
            global: Mutex::new(Bucket::new(global_limit, global_period)),
            provider_period,
            providers: DashMap::new(),
            fallback_match: Mutex::new(Bucket::new(fallback_limit, fallback_period)),
            fallback_search: Mutex::new(Bucket::new(fallback_limit, fallback_period)),
            quota_source,
            verification_failed: AtomicBool::new(false),
        }
    }

    /// Enter `verification_failed` mode: every non-trivial check is
    /// rejected from here on, but `status()` keeps working.
    pub fn mark_verification_failed(&self) {
        self.verification_failed.store(true, Ordering::SeqCst);
    }

    pub fn is_verification_failed(&self) -> bool {
        self.verification_failed.load(Ordering::SeqCst)
    }

    /// Check (and, on success, increment) the global bucket followed by
    /// the named provider's bucket. The global bucket is evaluated
    /// first and its rejection masks the provider decision entirely.
    pub fn check(&self, provider: &str) -> Result<()> {
        if self.is_verification_failed() {
            return Err(GatewayError::LimitExceeded { retry_after_secs: 60 });
        }
        let now = Utc::now();

        self.global
            .lock()
            .check_and_increment(now)
            .map_err(|retry_after_secs| GatewayError::LimitExceeded { retry_after_secs })?;

        let Some(quota) = self.quota_source.quota_for(provider) else {
            return Ok(());
        };
        let bucket = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(quota, self.provider_period)));
        bucket
            .lock()
            .check_and_increment(now)
            .map_err(|retry_after_secs| GatewayError::LimitExceeded { retry_after_secs })
    }

    /// Check (and, on success, increment) the fallback sub-bucket for
    /// `kind`. The global bucket is not consulted here: fallback
    /// traffic has its own independent budget per the spec.
    pub fn check_fallback(&self, kind: FallbackKind) -> Result<()> {
        if self.is_verification_failed() {
            return Err(GatewayError::LimitExceeded { retry_after_secs: 60 });
        }
        let now = Utc::now();
        let bucket = match kind {
            FallbackKind::Match => &self.fallback_match,
            FallbackKind::Search => &self.fallback_search,
        };
        bucket
            .lock()
            .check_and_increment(now)
            .map_err(|retry_after_secs| GatewayError::LimitExceeded { retry_after_secs })
    }

    /// Idempotent counter bump for a provider, used after a successful
    /// adapter call that did not itself go through [`Self::check`].
    pub fn increment(&self, provider: &str) {
        let now = Utc::now();
        let quota = self.quota_source.quota_for(provider).unwrap_or(u64::MAX);
        let bucket = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(quota, self.provider_period)));
        bucket.lock().bump(now);
    }

    /// Idempotent counter bump for a fallback sub-bucket.
    pub fn increment_fallback(&self, kind: FallbackKind) {
        let now = Utc::now();
        let bucket = match kind {
            FallbackKind::Match => &self.fallback_match,
            FallbackKind::Search => &self.fallback_search,
        };
        bucket.lock().bump(now);
    }

    /// A snapshot of every tracked bucket's counters and reset window,
    /// for the observability surface.
    pub fn status(&self) -> HashMap<String, BucketSnapshot> {
        let mut snapshot = HashMap::new();
        snapshot.insert(GLOBAL_BUCKET_KEY.to_string(), self.global.lock().snapshot());
        snapshot.insert(
            FallbackKind::Match.label().to_string(),
            self.fallback_match.lock().snapshot(),
        );
        snapshot.insert(
            FallbackKind::Search.label().to_string(),
            self.fallback_search.lock().snapshot(),
        );
        for entry in self.providers.iter() {
            snapshot.insert(entry.key().clone(), entry.value().lock().snapshot());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnlimitedQuota;
    impl ProviderQuota for UnlimitedQuota {
        fn quota_for(&self, _provider: &str) -> Option<u64> {
            None
        }
    }

    struct FixedQuota(u64);
    impl ProviderQuota for FixedQuota {
        fn quota_for(&self, _provider: &str) -> Option<u64> {
            Some(self.0)
        }
    }

    #[test]
    fn global_limit_resets_after_period() {
        let limiter = RateLimiter::new(
            5,
            Duration::from_millis(50),
            Duration::from_secs(60),
            10,
            Duration::from_secs(60),
            Box::new(UnlimitedQuota),
        );

        for _ in 0..5 {
            assert!(limiter.check("tencent").is_ok());
        }
        let sixth = limiter.check("tencent");
        assert!(matches!(sixth, Err(GatewayError::LimitExceeded { .. })));

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("tencent").is_ok());

        let snapshot = limiter.status();
        assert_eq!(snapshot.get("__global__").unwrap().count, 1);
    }

    #[test]
    fn global_hit_masks_provider_decision() {
        let limiter = RateLimiter::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(60),
            10,
            Duration::from_secs(60),
            Box::new(FixedQuota(100)),
        );
        assert!(limiter.check("tencent").is_ok());
        // Global is now exhausted; provider bucket (quota 100) is untouched.
        assert!(limiter.check("tencent").is_err());
        let snapshot = limiter.status();
        // Provider bucket was never created because global masked it.
        assert!(!snapshot.contains_key("tencent"));
    }

    #[test]
    fn provider_quota_enforced_independently_of_global() {
        let limiter = RateLimiter::new(
            1000,
            Duration::from_secs(60),
            Duration::from_secs(60),
            10,
            Duration::from_secs(60),
            Box::new(FixedQuota(2)),
        );
        assert!(limiter.check("tencent").is_ok());
        assert!(limiter.check("tencent").is_ok());
        assert!(limiter.check("tencent").is_err());
        // A different provider has its own independent bucket.
        assert!(limiter.check("youku").is_ok());
    }

    #[test]
    fn fallback_buckets_are_independent_of_global_and_each_other() {
        let limiter = RateLimiter::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(60),
            2,
            Duration::from_secs(60),
            Box::new(UnlimitedQuota),
        );
        assert!(limiter.check("tencent").is_ok());
        assert!(limiter.check("tencent").is_err(), "global exhausted");

        assert!(limiter.check_fallback(FallbackKind::Search).is_ok());
        assert!(limiter.check_fallback(FallbackKind::Search).is_ok());
        assert!(limiter.check_fallback(FallbackKind::Search).is_err());
        // Match bucket is separate from search.
        assert!(limiter.check_fallback(FallbackKind::Match).is_ok());
    }

    #[test]
    fn verification_failed_mode_rejects_everything() {
        let limiter = RateLimiter::new(
            1000,
            Duration::from_secs(60),
            Duration::from_secs(60),
            1000,
            Duration::from_secs(60),
            Box::new(UnlimitedQuota),
        );
        limiter.mark_verification_failed();
        assert!(limiter.check("tencent").is_err());
        assert!(limiter.check_fallback(FallbackKind::Match).is_err());
    }
}
