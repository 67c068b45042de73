//! Discovered-permission types.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use relay_common::ToolId;

/// The operations a credentialed tool instance may invoke, as last observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPermissions {
    pub tenant_tool_id: ToolId,
    pub scopes: Vec<String>,
    pub allowed_operation_ids: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Served from an expired cache entry after a refresh failure.
    #[serde(default)]
    pub stale: bool,
    /// Fail-open result: discovery failed with no cache, the full operation
    /// set was exposed. Per-call authorization still applies.
    #[serde(default)]
    pub degraded: bool,
}

impl DiscoveredPermissions {
    #[must_use]
    pub fn allows(&self, operation_id: &str) -> bool {
        self.allowed_operation_ids
            .iter()
            .any(|id| id == operation_id)
    }
}
