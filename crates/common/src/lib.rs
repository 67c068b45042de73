//! Shared types, error definitions, and identifiers used across all relay crates.

pub mod audit;
pub mod error;
pub mod ids;

pub use {
    audit::{AuditEvent, AuditRecord},
    error::{Error, ErrorClass, FromMessage, RelayError, Result},
    ids::{AgentId, EventId, SessionId, TaskId, TenantId, ToolId},
};
