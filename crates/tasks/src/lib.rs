//! Task routing: the work-unit state machine, assignment strategies, and
//! idempotent submission.

pub mod engine;
pub mod error;
pub mod state_machine;
pub mod store;
pub mod strategy;
pub mod types;

pub use {
    engine::{EngineOptions, TaskEngine},
    error::TaskError,
    state_machine::transition_allowed,
    store::TaskStore,
    strategy::{AssignmentStrategy, RoundRobinCursor, pick_agent},
    types::{AgentInfo, AgentStatus, NewTask, TaskPriority, TaskRecord, TaskStatus, TaskTransition},
};
