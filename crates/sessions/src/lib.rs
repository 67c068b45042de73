//! MCP session state: the sharded session table, per-session agents, and
//! pending-request cancellation handles.
//!
//! A session exclusively owns its agents and pending requests; agents refer
//! back to their session by id only, so nothing here is cyclic.

pub mod registry;
pub mod session;

pub use {
    registry::SessionRegistry,
    session::{Session, SessionPhase},
};
