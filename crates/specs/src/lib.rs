//! Two-tier OpenAPI spec cache.
//!
//! L1 is an in-process cache with a jittered 24h TTL; L2 is a shared SQLite
//! table. Misses fetch over HTTP with a short timeout and bounded retries,
//! then fall back to specs embedded in the binary. Parse failures are fatal
//! for a key — nothing partial is ever cached.

pub mod cache;
pub mod embedded;
pub mod error;
pub mod fetch;
pub mod types;

pub use {
    cache::{SpecCache, SpecCacheOptions},
    error::SpecError,
    fetch::FetchOptions,
    types::{ParsedSpec, SpecOperation},
};
