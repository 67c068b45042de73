//! Configuration schema. Every tunable the core exposes lives here with its
//! documented default; `relay.toml` only needs to name what it changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub vault: VaultConfig,
    pub queue: QueueConfig,
    pub webhooks: WebhooksConfig,
    pub permissions: PermissionsConfig,
    pub specs: SpecCacheConfig,
    pub resilience: ResilienceConfig,
    pub tasks: TasksConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Listener configuration for the two front doors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for both listeners.
    pub bind: String,
    /// MCP WebSocket listener port (`/ws`).
    pub ws_port: u16,
    /// Webhook + management HTTP listener port.
    pub webhook_port: u16,
    /// Trust `X-Forwarded-For` when resolving client addresses.
    pub behind_proxy: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            ws_port: 8080,
            webhook_port: 8081,
            behind_proxy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database URL. `sqlite::memory:` is valid for ephemeral runs.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:relay.db".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base64-encoded 32-byte master key. Usually `${RELAY_MASTER_KEY}`.
    pub master_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis connection URL, required when `backend = "redis"`.
    pub redis_url: Option<String>,
    pub consumer_group: String,
    /// Worker tasks per service instance.
    pub consumers: usize,
    /// Seconds before an unacked entry becomes claimable by another consumer.
    pub visibility_timeout_secs: u64,
    /// Delivery attempts before an entry moves to the dead-letter stream.
    pub max_attempts: u32,
    /// Approximate per-tenant stream length cap.
    pub max_stream_len: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: None,
            consumer_group: "webhook-workers".into(),
            consumers: 5,
            visibility_timeout_secs: 30,
            max_attempts: 5,
            max_stream_len: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    /// Sliding dedup window.
    pub dedup_window_secs: u64,
    /// Per-provider dedup window overrides, keyed by provider name.
    pub dedup_overrides: HashMap<String, u64>,
    /// Stream length above which publishes for a tenant return 429.
    pub high_water_mark: u64,
    pub max_payload_bytes: usize,
    /// Entries younger than this keep full payloads in the queue.
    pub hot_ttl_secs: u64,
    /// Entries younger than this are compressed in place; older ones archive.
    pub warm_ttl_secs: u64,
    /// Root directory of the append-only cold archive.
    pub archive_dir: String,
    /// How often the lifecycle maintainer runs.
    pub maintenance_interval_secs: u64,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            dedup_overrides: HashMap::new(),
            high_water_mark: 100_000,
            max_payload_bytes: 1_048_576,
            hot_ttl_secs: 7_200,
            warm_ttl_secs: 86_400,
            archive_dir: "archive".into(),
            maintenance_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Cache TTL for discovered permissions.
    pub ttl_secs: u64,
    /// ± jitter applied to the TTL, in percent.
    pub jitter_pct: u8,
    /// Probe timeout against the provider's introspection endpoint.
    pub probe_timeout_secs: u64,
    /// When true, a discovery failure with no cached entry exposes nothing
    /// instead of the full operation set.
    pub fail_closed: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            jitter_pct: 20,
            probe_timeout_secs: 10,
            fail_closed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecCacheConfig {
    pub l1_ttl_secs: u64,
    pub l1_capacity: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
}

impl Default for SpecCacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl_secs: 86_400,
            l1_capacity: 256,
            fetch_timeout_secs: 5,
            fetch_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Rolling window for breaker error-ratio accounting.
    pub breaker_window_secs: u64,
    /// Minimum observed requests in the window before the breaker may open.
    pub breaker_min_requests: u64,
    /// Error ratio at or above which the breaker opens.
    pub breaker_error_ratio: f64,
    /// Base open → half-open reset timeout; doubled (capped) on repeated opens.
    pub breaker_reset_secs: u64,
    /// Consecutive half-open successes required to close.
    pub breaker_close_successes: u32,
    /// Concurrent outbound calls per provider.
    pub bulkhead_workers: usize,
    /// Queued calls per provider beyond the worker pool.
    pub bulkhead_queue: usize,
    /// Default tenant token-bucket capacity.
    pub rate_limit_burst: u32,
    /// Default tenant token-bucket refill, tokens per second.
    pub rate_limit_per_sec: f64,
    /// Per-provider refill overrides.
    pub rate_overrides: HashMap<String, f64>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_window_secs: 60,
            breaker_min_requests: 10,
            breaker_error_ratio: 0.5,
            breaker_reset_secs: 30,
            breaker_close_successes: 3,
            bulkhead_workers: 5,
            bulkhead_queue: 100,
            rate_limit_burst: 60,
            rate_limit_per_sec: 10.0,
            rate_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub max_delegations: u32,
    /// Tasks in progress longer than this are escalated (0 disables).
    pub escalation_timeout_secs: u64,
    /// Default assignment strategy: "round-robin", "least-loaded",
    /// "capability-match", or "priority".
    pub default_strategy: String,
    /// Idempotency record lifetime.
    pub idempotency_ttl_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_delegations: 3,
            escalation_timeout_secs: 0,
            default_strategy: "least-loaded".into(),
            idempotency_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber` env-filter directive.
    pub filter: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}

impl Default for QueueBackend {
    fn default() -> Self {
        Self::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.gateway.ws_port, 8080);
        assert_eq!(cfg.gateway.webhook_port, 8081);
        assert_eq!(cfg.queue.visibility_timeout_secs, 30);
        assert_eq!(cfg.queue.max_attempts, 5);
        assert_eq!(cfg.queue.consumer_group, "webhook-workers");
        assert_eq!(cfg.webhooks.dedup_window_secs, 300);
        assert_eq!(cfg.permissions.ttl_secs, 300);
        assert_eq!(cfg.resilience.breaker_min_requests, 10);
        assert_eq!(cfg.resilience.bulkhead_workers, 5);
        assert_eq!(cfg.tasks.max_delegations, 3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [gateway]
            ws_port = 9090

            [queue]
            backend = "redis"
            redis_url = "redis://localhost:6379"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.gateway.ws_port, 9090);
        assert_eq!(cfg.gateway.webhook_port, 8081);
        assert_eq!(cfg.queue.backend, QueueBackend::Redis);
        assert_eq!(cfg.queue.max_stream_len, 1_000_000);
    }

    #[test]
    fn dedup_override_map_parses() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [webhooks.dedup_overrides]
            github = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.webhooks.dedup_overrides.get("github"), Some(&120));
    }
}
