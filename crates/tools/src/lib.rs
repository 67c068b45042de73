//! The organization-tool adapter: binds a tenant's credentialed provider
//! instance to permission-filtered MCP tools.
//!
//! The adapter is plain composition: it holds a provider definition, the
//! discovered permissions, and the protection layer (breaker, limiter,
//! bulkhead) plus an audit sink — there is no inheritance anywhere in this
//! path.

pub mod adapter;
pub mod audit;
pub mod error;
pub mod naming;
pub mod schema;
pub mod store;

pub use {
    adapter::{OrgToolAdapter, ToolGuards},
    audit::AuditStore,
    error::ToolError,
    naming::mcp_tool_name,
    store::{OrgToolError, OrgToolRecord, OrgToolStatus, OrgToolStore},
};
