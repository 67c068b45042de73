//! Per-provider failure containment: circuit breakers, bulkheads, and
//! tenant rate limiting.
//!
//! One breaker instance exists per `(provider, tenant)`; bulkheads are
//! per-provider; token buckets are per `(tenant, provider)`. All three are
//! consulted on the outbound tool-call path, cheapest check first.

pub mod breaker;
pub mod bulkhead;
pub mod error;
pub mod rate_limit;

pub use {
    breaker::{BreakerConfig, BreakerRegistry, BreakerState},
    bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadRegistry},
    error::ResilienceError,
    rate_limit::{RateLimitConfig, RateLimiter},
};
