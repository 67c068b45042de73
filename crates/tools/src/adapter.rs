//! Expansion and guarded execution of one organization tool.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    secrecy::SecretString,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    relay_common::{AuditEvent, AuditRecord},
    relay_metrics::{counter, labels, names},
    relay_permissions::DiscoveredPermissions,
    relay_protocol::{McpToolDef, ToolsCallResult},
    relay_providers::{ProviderDef, ProviderExecutor},
    relay_resilience::{BreakerRegistry, BulkheadRegistry, RateLimiter},
};

use crate::{
    audit::AuditStore,
    error::ToolError,
    naming::mcp_tool_name,
    schema::{input_schema, validate_args},
    store::OrgToolRecord,
};

/// The protection layer shared by every adapter in the process.
pub struct ToolGuards {
    pub breakers: BreakerRegistry,
    pub bulkheads: BulkheadRegistry,
    pub limiter: RateLimiter,
}

/// Binds one organization tool to MCP: expansion and execution.
///
/// Composition only — the adapter references the provider, the guards, and
/// the audit sink; it owns none of them.
pub struct OrgToolAdapter {
    record: OrgToolRecord,
    provider: Arc<ProviderDef>,
    permissions: DiscoveredPermissions,
    executor: Arc<ProviderExecutor>,
    guards: Arc<ToolGuards>,
    audit: Arc<AuditStore>,
    /// Reverse name map built at expansion: MCP tool name → operation id.
    names: HashMap<String, String>,
}

impl OrgToolAdapter {
    #[must_use]
    pub fn new(
        record: OrgToolRecord,
        provider: Arc<ProviderDef>,
        permissions: DiscoveredPermissions,
        executor: Arc<ProviderExecutor>,
        guards: Arc<ToolGuards>,
        audit: Arc<AuditStore>,
    ) -> Self {
        let names = provider
            .operations
            .iter()
            .filter(|op| permissions.allows(&op.operation_id))
            .map(|op| {
                (
                    mcp_tool_name(&provider.name, &op.operation_id),
                    op.operation_id.clone(),
                )
            })
            .collect();
        Self {
            record,
            provider,
            permissions,
            executor,
            guards,
            audit,
            names,
        }
    }

    /// The permission-filtered MCP tool list for this instance.
    ///
    /// Exactly the intersection of the provider's operations and the
    /// discovered permissions — nothing else is ever exposed.
    #[must_use]
    pub fn expand(&self) -> Vec<McpToolDef> {
        let mut tools: Vec<McpToolDef> = self
            .provider
            .operations
            .iter()
            .filter(|op| self.permissions.allows(&op.operation_id))
            .map(|op| McpToolDef {
                name: mcp_tool_name(&self.provider.name, &op.operation_id),
                description: Some(op.description.clone()),
                input_schema: input_schema(op),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Whether this adapter exposes the given MCP tool name.
    #[must_use]
    pub fn resolves(&self, tool_name: &str) -> bool {
        self.names.contains_key(tool_name)
    }

    /// Execute a tool call behind the full protection layer.
    ///
    /// Order: permission resolve → rate limit → breaker → bulkhead →
    /// provider call (cancellable) → outcome accounting → audit.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        credential: &SecretString,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<ToolsCallResult, ToolError> {
        // Guessing names outside the permission set surfaces exactly like a
        // name that never existed.
        let operation_id = self
            .names
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?
            .clone();
        let operation = self
            .provider
            .operation(&operation_id)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        let params = validate_args(operation, args).map_err(ToolError::InvalidArgs)?;

        let tenant = self.record.tenant_id;
        let provider_name = &self.provider.name;

        self.guards.limiter.try_acquire(tenant, provider_name)?;
        self.guards.breakers.check(provider_name, tenant)?;
        let _permit = self
            .guards
            .bulkheads
            .get(provider_name)
            .acquire()
            .await?;

        debug!(
            tenant_id = %tenant,
            tool = tool_name,
            operation_id,
            "executing tool call"
        );

        let call = self.executor.execute_with_timeout(
            &self.provider,
            &operation_id,
            &params,
            credential,
            deadline,
        );
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.audit_outcome(tool_name, &operation_id, "cancelled").await;
                return Err(ToolError::Cancelled);
            },
            result = call => result,
        };

        match result {
            Ok(value) => {
                self.guards.breakers.record_success(provider_name, tenant);
                self.audit_outcome(tool_name, &operation_id, "ok").await;
                let text = serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string());
                Ok(ToolsCallResult::text(text))
            },
            Err(error) => {
                self.guards.breakers.record_failure(provider_name, tenant);
                if error.status() == Some(429) {
                    self.guards.limiter.throttled_by_remote(
                        tenant,
                        provider_name,
                        error.retry_after(),
                    );
                }
                counter!(
                    names::ERRORS_TOTAL,
                    labels::TENANT => tenant.to_string(),
                    labels::COMPONENT => "tools",
                    labels::PROVIDER => provider_name.clone(),
                )
                .increment(1);
                warn!(
                    tenant_id = %tenant,
                    tool = tool_name,
                    error = %error,
                    "tool call failed"
                );
                self.audit_outcome(tool_name, &operation_id, "error").await;
                Err(error.into())
            },
        }
    }

    #[must_use]
    pub fn record(&self) -> &OrgToolRecord {
        &self.record
    }

    #[must_use]
    pub fn permissions(&self) -> &DiscoveredPermissions {
        &self.permissions
    }

    async fn audit_outcome(&self, tool_name: &str, operation_id: &str, outcome: &str) {
        self.audit
            .record(AuditRecord::new(
                self.record.tenant_id,
                AuditEvent::ToolExecution {
                    tool_name: tool_name.to_string(),
                    provider: self.provider.name.clone(),
                    operation_id: operation_id.to_string(),
                    outcome: outcome.to_string(),
                },
            ))
            .await;
    }
}
