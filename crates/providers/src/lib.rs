//! Developer-tool provider definitions, registry, and HTTP execution.
//!
//! A provider is a static record: a base URL template, auth rules, and a
//! catalog of operation mappings. Providers register at startup; runtime
//! mutation is not supported. New providers are added by extending the
//! built-in catalog.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod registry;
pub mod types;

pub use {
    catalog::builtin_providers,
    error::ProviderError,
    executor::ProviderExecutor,
    registry::ProviderRegistry,
    types::{AuthRule, IntrospectionRule, OperationMapping, ProviderDef},
};

/// Shared HTTP client for provider calls.
///
/// Providers share one client for connection pools, DNS cache, and TLS
/// sessions.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}
