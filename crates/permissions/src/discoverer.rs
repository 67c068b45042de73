//! Coalesced discovery with a stale-tolerant cache.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    dashmap::DashMap,
    rand::Rng,
    secrecy::SecretString,
    tokio::sync::Mutex,
    tracing::warn,
};

use {
    relay_common::ToolId,
    relay_providers::ProviderDef,
    relay_specs::ParsedSpec,
};

use crate::{error::PermissionError, probe::ScopeProbe, types::DiscoveredPermissions};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub ttl: Duration,
    /// ± jitter applied to the TTL, percent of the base.
    pub jitter_pct: u8,
    /// Refuse to serve anything on a cold-cache discovery failure, instead
    /// of failing open with the full operation set.
    pub fail_closed: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            jitter_pct: 20,
            fail_closed: false,
        }
    }
}

/// Coalescing key: one probe in flight per tool instance and credential
/// generation. Rotating a credential changes the fingerprint and bypasses
/// the old entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    tool_id: ToolId,
    fingerprint: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    permissions: DiscoveredPermissions,
    expires_at: chrono::DateTime<Utc>,
}

/// Discovers and caches per-tool permissions.
pub struct PermissionDiscoverer {
    probe: ScopeProbe,
    options: DiscoveryOptions,
    cache: DashMap<Key, CacheEntry>,
    /// Per-key probe locks; holders of a lock re-check the cache before
    /// probing, so concurrent callers coalesce onto one upstream request.
    in_flight: DashMap<Key, Arc<Mutex<()>>>,
}

impl PermissionDiscoverer {
    #[must_use]
    pub fn new(probe: ScopeProbe, options: DiscoveryOptions) -> Self {
        Self {
            probe,
            options,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Current permissions for a tool, probing if the cache is cold or
    /// expired.
    pub async fn discover(
        &self,
        tool_id: ToolId,
        credential_fingerprint: &str,
        credential: &SecretString,
        provider: &ProviderDef,
        spec: &ParsedSpec,
    ) -> Result<DiscoveredPermissions, PermissionError> {
        let key = Key {
            tool_id,
            fingerprint: credential_fingerprint.to_string(),
        };

        if let Some(fresh) = self.fresh_entry(&key) {
            return Ok(fresh);
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A coalesced caller may have populated the cache while we waited.
        if let Some(fresh) = self.fresh_entry(&key) {
            return Ok(fresh);
        }

        match self.probe.granted_scopes(provider, credential).await {
            Ok(scopes) => {
                let allowed = spec.operations_allowed_by(&scopes);
                let permissions = DiscoveredPermissions {
                    tenant_tool_id: tool_id,
                    scopes,
                    allowed_operation_ids: allowed,
                    discovered_at: Utc::now(),
                    ttl_secs: self.options.ttl.as_secs(),
                    stale: false,
                    degraded: false,
                };
                self.insert(key, permissions.clone());
                Ok(permissions)
            },
            Err(message) => self.fall_back(&key, tool_id, provider, spec, message),
        }
    }

    /// Whether a refresh-ahead pass should re-probe this key soon.
    ///
    /// True once 80% of the entry's lifetime has elapsed (or the entry is
    /// missing entirely).
    #[must_use]
    pub fn needs_refresh(&self, tool_id: ToolId, credential_fingerprint: &str) -> bool {
        let key = Key {
            tool_id,
            fingerprint: credential_fingerprint.to_string(),
        };
        match self.cache.get(&key) {
            None => true,
            Some(entry) => {
                let lifetime = entry
                    .expires_at
                    .signed_duration_since(entry.permissions.discovered_at);
                let elapsed = Utc::now().signed_duration_since(entry.permissions.discovered_at);
                elapsed.num_milliseconds() * 5 >= lifetime.num_milliseconds() * 4
            },
        }
    }

    /// Drop every cached generation for a tool (credential rotated away).
    pub fn invalidate_tool(&self, tool_id: ToolId) {
        self.cache.retain(|key, _| key.tool_id != tool_id);
        self.in_flight.retain(|key, _| key.tool_id != tool_id);
    }

    fn fresh_entry(&self, key: &Key) -> Option<DiscoveredPermissions> {
        let entry = self.cache.get(key)?;
        (Utc::now() < entry.expires_at).then(|| entry.permissions.clone())
    }

    fn insert(&self, key: Key, permissions: DiscoveredPermissions) {
        let base_ms = self.options.ttl.as_millis() as i64;
        let spread = base_ms * i64::from(self.options.jitter_pct) / 100;
        let jitter = if spread > 0 {
            rand::rng().random_range(-spread..=spread)
        } else {
            0
        };
        let expires_at =
            permissions.discovered_at + chrono::Duration::milliseconds(base_ms + jitter);
        self.cache.insert(key, CacheEntry {
            permissions,
            expires_at,
        });
    }

    fn fall_back(
        &self,
        key: &Key,
        tool_id: ToolId,
        provider: &ProviderDef,
        spec: &ParsedSpec,
        message: String,
    ) -> Result<DiscoveredPermissions, PermissionError> {
        // Last-known-good beats fail-open: an expired entry still reflects a
        // real observation.
        if let Some(entry) = self.cache.get(key) {
            warn!(
                tool_id = %tool_id,
                provider = %provider.name,
                %message,
                "permission refresh failed; serving stale cache"
            );
            let mut stale = entry.permissions.clone();
            stale.stale = true;
            return Ok(stale);
        }

        if self.options.fail_closed {
            return Err(PermissionError::DiscoveryFailed {
                tool_id: tool_id.to_string(),
                message,
            });
        }

        // Fail-open for availability: expose the full operation set flagged
        // degraded. Execution-time authorization still gates each call.
        warn!(
            tool_id = %tool_id,
            provider = %provider.name,
            %message,
            "cold-cache discovery failed; failing open with degraded permissions"
        );
        Ok(DiscoveredPermissions {
            tenant_tool_id: tool_id,
            scopes: Vec::new(),
            allowed_operation_ids: spec
                .operations
                .iter()
                .map(|op| op.operation_id.clone())
                .collect(),
            discovered_at: Utc::now(),
            ttl_secs: 0,
            stale: false,
            degraded: true,
        })
    }
}
