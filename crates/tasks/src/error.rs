use crate::types::TaskStatus;

/// Task engine failures.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found")]
    NotFound,

    #[error("transition {from:?} → {to:?} is not allowed")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("delegation limit reached")]
    DelegationLimit,

    #[error("no agent satisfies the task's capability requirements")]
    NoEligibleAgent,

    /// Same idempotency key, different payload. Audit-logged by the caller.
    #[error("idempotency key reused with a different payload")]
    IdempotencyConflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
