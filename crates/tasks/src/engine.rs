//! The task engine: idempotent submission, assignment, transitions,
//! escalation.

use std::time::Duration;

use {
    chrono::Utc,
    sha2::{Digest, Sha256},
    tracing::{info, warn},
};

use {
    relay_common::{AgentId, TaskId, TenantId},
    relay_metrics::{histogram, labels, names},
};

use crate::{
    error::TaskError,
    state_machine::transition_allowed,
    store::TaskStore,
    strategy::{AssignmentStrategy, RoundRobinCursor, pick_agent},
    types::{AgentInfo, NewTask, TaskRecord, TaskStatus, TaskTransition},
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_delegations: u32,
    pub default_strategy: AssignmentStrategy,
    pub idempotency_ttl: Duration,
    /// Zero disables auto-escalation.
    pub escalation_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_delegations: 3,
            default_strategy: AssignmentStrategy::LeastLoaded,
            idempotency_ttl: Duration::from_secs(86_400),
            escalation_timeout: Duration::ZERO,
        }
    }
}

/// Routes tasks through their lifecycle.
pub struct TaskEngine {
    store: TaskStore,
    options: EngineOptions,
    round_robin: RoundRobinCursor,
}

impl TaskEngine {
    #[must_use]
    pub fn new(store: TaskStore, options: EngineOptions) -> Self {
        Self {
            store,
            options,
            round_robin: RoundRobinCursor::default(),
        }
    }

    /// Submit a task. A live idempotency key returns the existing task
    /// instead of creating a new one.
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        new_task: NewTask,
    ) -> Result<TaskRecord, TaskError> {
        let task_id = TaskId::new();

        if let Some(key) = &new_task.idempotency_key {
            let fingerprint = payload_fingerprint(&new_task.payload);
            if let Some(existing) = self
                .store
                .claim_idempotency_key(
                    tenant_id,
                    key,
                    task_id,
                    &fingerprint,
                    self.options.idempotency_ttl,
                )
                .await?
            {
                info!(tenant_id = %tenant_id, task_id = %existing, "idempotent resubmission");
                return self.store.get(tenant_id, existing).await;
            }
        }

        let now = Utc::now();
        let task = TaskRecord {
            task_id,
            tenant_id,
            kind: new_task.kind,
            priority: new_task.priority,
            payload: new_task.payload,
            status: TaskStatus::Pending,
            required_capabilities: new_task.required_capabilities,
            assigned_agent_id: None,
            delegations_remaining: self.options.max_delegations,
            idempotency_key: new_task.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&task).await?;
        Ok(task)
    }

    /// Assign the next pending tasks to agents. Returns the assignments
    /// made, in dequeue order (priority rank, FIFO within a rank).
    pub async fn assign_pending(
        &self,
        tenant_id: TenantId,
        agents: &[AgentInfo],
        strategy: Option<AssignmentStrategy>,
        limit: usize,
    ) -> Result<Vec<(TaskRecord, AgentId)>, TaskError> {
        let strategy = strategy.unwrap_or(self.options.default_strategy);
        let pending = self.store.next_pending(tenant_id, limit).await?;
        let mut assigned = Vec::new();

        for task in pending {
            let Some(agent) = pick_agent(
                strategy,
                agents,
                &task.required_capabilities,
                &self.round_robin,
            ) else {
                // Leave it pending; a later pass may have eligible agents.
                continue;
            };

            let wait = Utc::now()
                .signed_duration_since(task.created_at)
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            histogram!(
                names::TASK_WAIT_SECONDS,
                labels::TENANT => tenant_id.to_string(),
                labels::COMPONENT => "tasks",
            )
            .record(wait);

            let updated = self
                .transition(
                    &task,
                    TaskStatus::Assigned,
                    &agent.agent_id.to_string(),
                    "assigned by strategy",
                    Some(agent.agent_id),
                    task.delegations_remaining,
                )
                .await?;
            assigned.push((updated, agent.agent_id));
        }
        Ok(assigned)
    }

    /// Agent picked the task up.
    pub async fn start(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        agent_id: AgentId,
    ) -> Result<TaskRecord, TaskError> {
        let task = self.store.get(tenant_id, task_id).await?;
        self.transition(
            &task,
            TaskStatus::InProgress,
            &agent_id.to_string(),
            "started",
            task.assigned_agent_id,
            task.delegations_remaining,
        )
        .await
    }

    pub async fn complete(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        agent_id: AgentId,
    ) -> Result<TaskRecord, TaskError> {
        let task = self.store.get(tenant_id, task_id).await?;
        self.transition(
            &task,
            TaskStatus::Completed,
            &agent_id.to_string(),
            "completed",
            task.assigned_agent_id,
            task.delegations_remaining,
        )
        .await
    }

    pub async fn fail(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        agent_id: AgentId,
        reason: &str,
    ) -> Result<TaskRecord, TaskError> {
        let task = self.store.get(tenant_id, task_id).await?;
        self.transition(
            &task,
            TaskStatus::Failed,
            &agent_id.to_string(),
            reason,
            task.assigned_agent_id,
            task.delegations_remaining,
        )
        .await
    }

    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        actor: &str,
        reason: &str,
    ) -> Result<TaskRecord, TaskError> {
        let task = self.store.get(tenant_id, task_id).await?;
        self.transition(
            &task,
            TaskStatus::Cancelled,
            actor,
            reason,
            task.assigned_agent_id,
            task.delegations_remaining,
        )
        .await
    }

    /// Hand a task back for reassignment, consuming one delegation.
    pub async fn delegate(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        actor: &str,
        reason: &str,
    ) -> Result<TaskRecord, TaskError> {
        let task = self.store.get(tenant_id, task_id).await?;
        if task.delegations_remaining == 0 {
            return Err(TaskError::DelegationLimit);
        }
        // The task rejoins the assignable pool; the next assignment pass
        // moves it delegated → assigned onto a new agent.
        self.transition(
            &task,
            TaskStatus::Delegated,
            actor,
            reason,
            None,
            task.delegations_remaining - 1,
        )
        .await
    }

    /// Escalate tasks stuck in progress past the configured timeout.
    ///
    /// Returns the escalated tasks so the caller can emit reassignment
    /// events to subscribed sessions.
    pub async fn escalate_stalled(&self) -> Result<Vec<TaskRecord>, TaskError> {
        if self.options.escalation_timeout.is_zero() {
            return Ok(Vec::new());
        }
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.options.escalation_timeout).unwrap_or_default();
        let stalled = self.store.stalled_in_progress(cutoff).await?;

        let mut escalated = Vec::new();
        for task in stalled {
            if task.delegations_remaining == 0 {
                warn!(task_id = %task.task_id, "stalled task has no delegations left");
                continue;
            }
            let updated = self
                .transition(
                    &task,
                    TaskStatus::Delegated,
                    "escalation",
                    "escalation timeout exceeded",
                    None,
                    task.delegations_remaining - 1,
                )
                .await?;
            escalated.push(updated);
        }
        Ok(escalated)
    }

    pub async fn get(&self, tenant_id: TenantId, task_id: TaskId) -> Result<TaskRecord, TaskError> {
        self.store.get(tenant_id, task_id).await
    }

    /// Assignable tasks in dequeue order (read-only state exposure).
    pub async fn pending_tasks(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskError> {
        self.store.next_pending(tenant_id, limit).await
    }

    pub async fn history(&self, task_id: TaskId) -> Result<Vec<TaskTransition>, TaskError> {
        self.store.history(task_id).await
    }

    async fn transition(
        &self,
        task: &TaskRecord,
        to: TaskStatus,
        actor: &str,
        reason: &str,
        assigned_agent_id: Option<AgentId>,
        delegations_remaining: u32,
    ) -> Result<TaskRecord, TaskError> {
        if !transition_allowed(task.status, to) {
            return Err(TaskError::InvalidTransition {
                from: task.status,
                to,
            });
        }
        let transition = TaskTransition {
            from: task.status,
            to,
            actor: actor.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        };
        self.store
            .apply_transition(task, &transition, assigned_agent_id, delegations_remaining)
            .await?;

        let mut updated = task.clone();
        updated.status = to;
        updated.assigned_agent_id = assigned_agent_id;
        updated.delegations_remaining = delegations_remaining;
        updated.updated_at = transition.at;
        Ok(updated)
    }
}

fn payload_fingerprint(payload: &serde_json::Value) -> String {
    let canonical = payload.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{AgentStatus, TaskPriority},
        sqlx::SqlitePool,
    };

    async fn engine(options: EngineOptions) -> TaskEngine {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        TaskEngine::new(TaskStore::new(pool).await.unwrap(), options)
    }

    fn new_task(priority: TaskPriority, key: Option<&str>) -> NewTask {
        NewTask {
            kind: "webhook.github.push".into(),
            priority,
            payload: serde_json::json!({"ref": "main"}),
            required_capabilities: vec![],
            idempotency_key: key.map(str::to_string),
        }
    }

    fn agent(tenant: TenantId, load: u32) -> AgentInfo {
        AgentInfo {
            agent_id: AgentId::new(),
            tenant_id: tenant,
            capabilities: vec!["code".into()],
            current_load: load,
            last_seen: Utc::now(),
            status: AgentStatus::Available,
        }
    }

    #[tokio::test]
    async fn submit_assign_start_complete() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        let task = engine
            .submit(tenant, new_task(TaskPriority::High, None))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let worker = agent(tenant, 0);
        let assigned = engine
            .assign_pending(tenant, &[worker.clone()], None, 10)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].1, worker.agent_id);

        engine
            .start(tenant, task.task_id, worker.agent_id)
            .await
            .unwrap();
        let done = engine
            .complete(tenant, task.task_id, worker.agent_id)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        // History length equals the number of transitions taken.
        let history = engine.history(task.task_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from, TaskStatus::Pending);
        assert_eq!(history[2].to, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_same_task() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        let first = engine
            .submit(tenant, new_task(TaskPriority::Medium, Some("evt-1")))
            .await
            .unwrap();
        let second = engine
            .submit(tenant, new_task(TaskPriority::Medium, Some("evt-1")))
            .await
            .unwrap();
        assert_eq!(first.task_id, second.task_id);
    }

    #[tokio::test]
    async fn same_key_different_payload_is_a_conflict() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        engine
            .submit(tenant, new_task(TaskPriority::Medium, Some("evt-1")))
            .await
            .unwrap();

        let mut altered = new_task(TaskPriority::Medium, Some("evt-1"));
        altered.payload = serde_json::json!({"ref": "develop"});
        assert!(matches!(
            engine.submit(tenant, altered).await,
            Err(TaskError::IdempotencyConflict)
        ));
    }

    #[tokio::test]
    async fn idempotency_keys_are_tenant_scoped() {
        let engine = engine(EngineOptions::default()).await;
        let a = engine
            .submit(TenantId::new(), new_task(TaskPriority::Low, Some("k")))
            .await
            .unwrap();
        let b = engine
            .submit(TenantId::new(), new_task(TaskPriority::Low, Some("k")))
            .await
            .unwrap();
        assert_ne!(a.task_id, b.task_id);
    }

    #[tokio::test]
    async fn priority_order_governs_dequeue() {
        let engine = engine(EngineOptions {
            default_strategy: AssignmentStrategy::Priority,
            ..EngineOptions::default()
        })
        .await;
        let tenant = TenantId::new();
        engine
            .submit(tenant, new_task(TaskPriority::Low, None))
            .await
            .unwrap();
        let critical = engine
            .submit(tenant, new_task(TaskPriority::Critical, None))
            .await
            .unwrap();
        engine
            .submit(tenant, new_task(TaskPriority::Medium, None))
            .await
            .unwrap();

        let worker = agent(tenant, 0);
        let assigned = engine
            .assign_pending(tenant, &[worker], None, 1)
            .await
            .unwrap();
        assert_eq!(assigned[0].0.task_id, critical.task_id);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        let task = engine
            .submit(tenant, new_task(TaskPriority::Medium, None))
            .await
            .unwrap();
        // pending → completed skips assignment.
        let result = engine
            .complete(tenant, task.task_id, AgentId::new())
            .await;
        assert!(matches!(result, Err(TaskError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn delegation_consumes_budget_and_requeues() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        let task = engine
            .submit(tenant, new_task(TaskPriority::Medium, None))
            .await
            .unwrap();
        let worker = agent(tenant, 0);
        engine
            .assign_pending(tenant, &[worker.clone()], None, 10)
            .await
            .unwrap();

        let delegated = engine
            .delegate(tenant, task.task_id, "agent", "needs different skills")
            .await
            .unwrap();
        assert_eq!(delegated.status, TaskStatus::Delegated);
        assert_eq!(delegated.delegations_remaining, 2);

        // The next assignment pass routes it to a new agent.
        let rescuer = agent(tenant, 0);
        let reassigned = engine
            .assign_pending(tenant, &[rescuer.clone()], None, 10)
            .await
            .unwrap();
        assert_eq!(reassigned.len(), 1);
        assert_eq!(reassigned[0].1, rescuer.agent_id);

        engine
            .delegate(tenant, task.task_id, "agent", "again")
            .await
            .unwrap();
        engine
            .assign_pending(tenant, &[rescuer.clone()], None, 10)
            .await
            .unwrap();
        engine
            .delegate(tenant, task.task_id, "agent", "again")
            .await
            .unwrap();
        engine
            .assign_pending(tenant, &[rescuer], None, 10)
            .await
            .unwrap();
        assert!(matches!(
            engine.delegate(tenant, task.task_id, "agent", "over").await,
            Err(TaskError::DelegationLimit)
        ));
    }

    #[tokio::test]
    async fn cross_tenant_task_reads_are_not_found() {
        let engine = engine(EngineOptions::default()).await;
        let owner = TenantId::new();
        let task = engine
            .submit(owner, new_task(TaskPriority::Medium, None))
            .await
            .unwrap();
        assert!(matches!(
            engine.get(TenantId::new(), task.task_id).await,
            Err(TaskError::NotFound)
        ));
    }

    #[tokio::test]
    async fn capability_filter_leaves_task_pending() {
        let engine = engine(EngineOptions::default()).await;
        let tenant = TenantId::new();
        let mut submission = new_task(TaskPriority::Medium, None);
        submission.required_capabilities = vec!["deploy".into()];
        let task = engine.submit(tenant, submission).await.unwrap();

        let worker = agent(tenant, 0); // only has "code"
        let assigned = engine
            .assign_pending(tenant, &[worker], None, 10)
            .await
            .unwrap();
        assert!(assigned.is_empty());
        assert_eq!(
            engine.get(tenant, task.task_id).await.unwrap().status,
            TaskStatus::Pending
        );
    }
}
