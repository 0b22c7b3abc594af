//! Named rate-limit registry shared across plugins (spec §4.5's "a plugin
//! may participate in a rate-limit registry keyed by service name").
//!
//! Each named limiter is a token bucket built on `governor`, created
//! lazily the first time that name is seen and reused for every
//! subsequent check. Mirrors the per-key limiter map the chaos harness's
//! own `RateLimiter` keeps for its per-IP and per-endpoint buckets.

use crate::error::{NetError, Result};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

type NamedLimiter = GovernorRateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Quota for one named limiter: steady-state rate plus burst allowance.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitQuota {
    /// Sustained requests per second.
    pub requests_per_second: NonZeroU32,
    /// Extra requests allowed to burst above the steady-state rate.
    pub burst_size: NonZeroU32,
}

impl Default for RateLimitQuota {
    fn default() -> Self {
        Self {
            requests_per_second: nonzero!(10u32),
            burst_size: nonzero!(10u32),
        }
    }
}

/// A registry of named token-bucket rate limiters, shared across every
/// plugin instance that participates in the same service's quota.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<NamedLimiter>>>,
}

impl RateLimiterRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check (and consume, on success) one token from the bucket named
    /// `name`, creating it with `quota` on first use. Subsequent calls for
    /// the same name ignore `quota` and reuse the existing bucket.
    pub fn check(&self, name: &str, quota: RateLimitQuota) -> Result<()> {
        let limiter = self.get_or_create(name, quota);
        limiter.check().map_err(|_| NetError::RateLimited { name: name.to_string() })
    }

    fn get_or_create(&self, name: &str, quota: RateLimitQuota) -> Arc<NamedLimiter> {
        if let Some(existing) = self.limiters.read().get(name) {
            return existing.clone();
        }
        let mut limiters = self.limiters.write();
        limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                let governor_quota = Quota::per_second(quota.requests_per_second).allow_burst(quota.burst_size);
                Arc::new(GovernorRateLimiter::direct(governor_quota))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_names_get_independent_buckets() {
        let registry = RateLimiterRegistry::new();
        let tight = RateLimitQuota {
            requests_per_second: nonzero!(1u32),
            burst_size: nonzero!(1u32),
        };
        assert!(registry.check("service-a", tight).is_ok());
        assert!(registry.check("service-a", tight).is_err());
        // A different name is unaffected by service-a's exhausted bucket.
        assert!(registry.check("service-b", tight).is_ok());
    }

    #[test]
    fn quota_only_applies_on_first_use() {
        let registry = RateLimiterRegistry::new();
        let generous = RateLimitQuota {
            requests_per_second: nonzero!(100u32),
            burst_size: nonzero!(100u32),
        };
        let tight = RateLimitQuota {
            requests_per_second: nonzero!(1u32),
            burst_size: nonzero!(1u32),
        };
        assert!(registry.check("service-c", generous).is_ok());
        // Re-requesting with a tighter quota does not shrink the existing bucket.
        for _ in 0..5 {
            assert!(registry.check("service-c", tight).is_ok());
        }
    }
}
