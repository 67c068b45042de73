//! Task and agent model types.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use relay_common::{AgentId, TaskId, TenantId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Dequeue rank: critical first.
    #[must_use]
    pub fn rank(self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Delegated,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Delegated => "delegated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "delegated" => Some(Self::Delegated),
            _ => None,
        }
    }

    /// Whether the task has reached a final state.
    #[must_use]
    pub fn terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Who drove the transition: an agent id, "system", or "escalation".
    pub actor: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A work unit routed to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub tenant_id: TenantId,
    pub kind: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub required_capabilities: Vec<String>,
    pub assigned_agent_id: Option<AgentId>,
    pub delegations_remaining: u32,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Offline,
}

/// A connected agent as seen by the assignment strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    pub capabilities: Vec<String>,
    pub current_load: u32,
    pub last_seen: DateTime<Utc>,
    pub status: AgentStatus,
}

impl AgentInfo {
    /// Whether this agent can take work requiring `capabilities`.
    #[must_use]
    pub fn covers(&self, capabilities: &[String]) -> bool {
        self.status == AgentStatus::Available
            && capabilities
                .iter()
                .all(|needed| self.capabilities.iter().any(|c| c == needed))
    }
}
