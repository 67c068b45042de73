//! Configuration validation.
//!
//! Checks a loaded [`RelayConfig`] for values that parse but cannot work:
//! zero ports, out-of-range ratios, a redis backend without a URL,
//! unresolved `${ENV}` placeholders in secrets.

use crate::schema::{QueueBackend, RelayConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "queue.redis_url".
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Validate a configuration, returning every problem found.
#[must_use]
pub fn validate(config: &RelayConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.gateway.ws_port == 0 {
        result.push(Severity::Error, "gateway.ws_port", "port must be non-zero");
    }
    if config.gateway.webhook_port == 0 {
        result.push(
            Severity::Error,
            "gateway.webhook_port",
            "port must be non-zero",
        );
    }
    if config.gateway.ws_port == config.gateway.webhook_port {
        result.push(
            Severity::Error,
            "gateway.webhook_port",
            "WebSocket and webhook listeners must use different ports",
        );
    }

    if config.queue.backend == QueueBackend::Redis {
        match &config.queue.redis_url {
            None => result.push(
                Severity::Error,
                "queue.redis_url",
                "required when backend = \"redis\"",
            ),
            Some(url) if url.contains("${") => result.push(
                Severity::Error,
                "queue.redis_url",
                "contains an unresolved ${ENV} placeholder",
            ),
            Some(_) => {},
        }
    }
    if config.queue.consumers == 0 {
        result.push(
            Severity::Error,
            "queue.consumers",
            "at least one consumer is required",
        );
    }

    if let Some(key) = &config.vault.master_key {
        if key.contains("${") {
            result.push(
                Severity::Error,
                "vault.master_key",
                "contains an unresolved ${ENV} placeholder",
            );
        }
    } else {
        result.push(
            Severity::Warning,
            "vault.master_key",
            "no master key configured; credential registration will fail",
        );
    }

    let ratio = config.resilience.breaker_error_ratio;
    if !(0.0..=1.0).contains(&ratio) || ratio == 0.0 {
        result.push(
            Severity::Error,
            "resilience.breaker_error_ratio",
            "must be in (0.0, 1.0]",
        );
    }
    if config.resilience.bulkhead_workers == 0 {
        result.push(
            Severity::Error,
            "resilience.bulkhead_workers",
            "bulkhead needs at least one worker",
        );
    }

    if config.permissions.jitter_pct > 100 {
        result.push(
            Severity::Error,
            "permissions.jitter_pct",
            "jitter is a percentage; must be ≤ 100",
        );
    }

    if config.webhooks.warm_ttl_secs <= config.webhooks.hot_ttl_secs {
        result.push(
            Severity::Error,
            "webhooks.warm_ttl_secs",
            "warm boundary must be later than the hot boundary",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let result = validate(&RelayConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn redis_backend_without_url_is_an_error() {
        let mut cfg = RelayConfig::default();
        cfg.queue.backend = QueueBackend::Redis;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "queue.redis_url")
        );
    }

    #[test]
    fn unresolved_placeholder_in_master_key_is_an_error() {
        let mut cfg = RelayConfig::default();
        cfg.vault.master_key = Some("${RELAY_MASTER_KEY}".into());
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn inverted_lifecycle_boundaries_rejected() {
        let mut cfg = RelayConfig::default();
        cfg.webhooks.hot_ttl_secs = 100_000;
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn colliding_ports_rejected() {
        let mut cfg = RelayConfig::default();
        cfg.gateway.webhook_port = cfg.gateway.ws_port;
        assert!(validate(&cfg).has_errors());
    }
}
