//! Configuration loading, validation, and env substitution.
//!
//! Config files: `relay.toml` or `relay.json`, searched in `./` then
//! `~/.config/relay/`. Supports `${ENV_VAR}` substitution in all string
//! values, and `RELAY_*` environment overrides for deployment knobs.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, discover_and_load, find_config_file, load_config},
    schema::{
        DatabaseConfig, GatewayConfig, LoggingConfig, MetricsConfig, PermissionsConfig,
        QueueBackend, QueueConfig, RelayConfig, ResilienceConfig, SpecCacheConfig, TasksConfig,
        VaultConfig, WebhooksConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
