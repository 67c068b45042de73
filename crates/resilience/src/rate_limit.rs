//! Per-tenant token-bucket rate limiting for outbound provider calls.
//!
//! Buckets refill continuously at a per-provider configurable rate. A 429
//! from the provider drains the caller's bucket so local admission mirrors
//! the remote back-pressure, and any `Retry-After` becomes a hold on the
//! bucket.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use relay_common::TenantId;

use crate::error::ResilienceError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size).
    pub burst: u32,
    /// Default refill rate, tokens per second.
    pub per_sec: f64,
    /// Per-provider refill overrides.
    pub overrides: HashMap<String, f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 60,
            per_sec: 10.0,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    /// Remote `Retry-After` hold; no admissions before this.
    held_until: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    tenant: TenantId,
    provider: String,
}

/// Token buckets for every `(tenant, provider)` pair.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<BucketKey, Mutex<Bucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn refill_rate(&self, provider: &str) -> f64 {
        self.config
            .overrides
            .get(provider)
            .copied()
            .unwrap_or(self.config.per_sec)
    }

    /// Try to take one token. `Err(RateLimited)` carries the wait estimate.
    pub fn try_acquire(&self, tenant: TenantId, provider: &str) -> Result<(), ResilienceError> {
        self.try_acquire_at(tenant, provider, Instant::now())
    }

    pub fn try_acquire_at(
        &self,
        tenant: TenantId,
        provider: &str,
        now: Instant,
    ) -> Result<(), ResilienceError> {
        let rate = self.refill_rate(provider);
        let key = BucketKey {
            tenant,
            provider: provider.to_string(),
        };
        let entry = self.buckets.entry(key).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: f64::from(self.config.burst),
                last_refill: now,
                held_until: None,
            })
        });
        let mut bucket = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(held_until) = bucket.held_until {
            if now < held_until {
                return Err(ResilienceError::RateLimited {
                    retry_after: held_until.duration_since(now),
                });
            }
            bucket.held_until = None;
        }

        // Continuous refill since the last observation.
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(f64::from(self.config.burst));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(ResilienceError::RateLimited {
                retry_after: Duration::from_secs_f64(deficit / rate.max(f64::EPSILON)),
            })
        }
    }

    /// Mirror a remote 429: drain the bucket and honor `Retry-After`.
    pub fn throttled_by_remote(
        &self,
        tenant: TenantId,
        provider: &str,
        retry_after: Option<Duration>,
    ) {
        self.throttled_by_remote_at(tenant, provider, retry_after, Instant::now());
    }

    pub fn throttled_by_remote_at(
        &self,
        tenant: TenantId,
        provider: &str,
        retry_after: Option<Duration>,
        now: Instant,
    ) {
        let key = BucketKey {
            tenant,
            provider: provider.to_string(),
        };
        let entry = self.buckets.entry(key).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: now,
                held_until: None,
            })
        });
        let mut bucket = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        bucket.tokens = 0.0;
        bucket.last_refill = now;
        if let Some(after) = retry_after {
            bucket.held_until = Some(now + after);
        }
        tracing::debug!(tenant_id = %tenant, provider, "mirroring remote 429 into local bucket");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn small_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            burst: 2,
            per_sec: 1.0,
            overrides: HashMap::new(),
        })
    }

    #[test]
    fn burst_then_limited() {
        let limiter = small_limiter();
        let tenant = TenantId::new();
        let now = Instant::now();
        assert!(limiter.try_acquire_at(tenant, "github", now).is_ok());
        assert!(limiter.try_acquire_at(tenant, "github", now).is_ok());
        assert!(matches!(
            limiter.try_acquire_at(tenant, "github", now),
            Err(ResilienceError::RateLimited { .. })
        ));
    }

    #[test]
    fn refills_over_time() {
        let limiter = small_limiter();
        let tenant = TenantId::new();
        let now = Instant::now();
        for _ in 0..2 {
            limiter.try_acquire_at(tenant, "github", now).unwrap();
        }
        let later = now + Duration::from_secs(2);
        assert!(limiter.try_acquire_at(tenant, "github", later).is_ok());
    }

    #[test]
    fn tenants_have_independent_buckets() {
        let limiter = small_limiter();
        let a = TenantId::new();
        let b = TenantId::new();
        let now = Instant::now();
        for _ in 0..2 {
            limiter.try_acquire_at(a, "github", now).unwrap();
        }
        assert!(limiter.try_acquire_at(a, "github", now).is_err());
        assert!(limiter.try_acquire_at(b, "github", now).is_ok());
    }

    #[test]
    fn remote_429_drains_and_holds() {
        let limiter = small_limiter();
        let tenant = TenantId::new();
        let now = Instant::now();
        assert!(limiter.try_acquire_at(tenant, "github", now).is_ok());

        limiter.throttled_by_remote_at(tenant, "github", Some(Duration::from_secs(30)), now);
        let Err(ResilienceError::RateLimited { retry_after }) =
            limiter.try_acquire_at(tenant, "github", now + Duration::from_secs(1))
        else {
            panic!("expected hold");
        };
        assert!(retry_after > Duration::from_secs(25));

        // After the hold expires the bucket refills normally.
        let later = now + Duration::from_secs(35);
        assert!(limiter.try_acquire_at(tenant, "github", later).is_ok());
    }

    #[test]
    fn provider_override_changes_refill() {
        let mut overrides = HashMap::new();
        overrides.insert("jira".to_string(), 100.0);
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 1,
            per_sec: 0.1,
            overrides,
        });
        let tenant = TenantId::new();
        let now = Instant::now();
        limiter.try_acquire_at(tenant, "jira", now).unwrap();
        // At 100 tokens/sec a 20ms wait is enough.
        assert!(
            limiter
                .try_acquire_at(tenant, "jira", now + Duration::from_millis(20))
                .is_ok()
        );
    }
}
