//! Permission discovery: what operations may a credential invoke?
//!
//! Discovery probes the provider's introspection surface for granted scopes,
//! maps them onto operation ids via the spec's security requirements, and
//! caches the result with a jittered TTL. Discovered permissions are never
//! the source of truth — every call is still authorized against the current
//! set at execution time.

pub mod discoverer;
pub mod error;
pub mod probe;
pub mod types;

pub use {
    discoverer::{DiscoveryOptions, PermissionDiscoverer},
    error::PermissionError,
    probe::ScopeProbe,
    types::DiscoveredPermissions,
};
