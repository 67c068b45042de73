//! MCP tool naming.
//!
//! `{provider}_{operation_id}` with slashes flattened to underscores. The
//! flattening is lossy, so reverse lookup always goes through the name map
//! built at expansion time, never through string surgery.

/// Public MCP name for a provider operation.
#[must_use]
pub fn mcp_tool_name(provider: &str, operation_id: &str) -> String {
    format!("{provider}_{}", operation_id.replace('/', "_"))
}
