//! Task persistence: tasks, transition history, idempotency keys.

use {
    chrono::{DateTime, Utc},
    sqlx::SqlitePool,
};

use relay_common::{AgentId, TaskId, TenantId};

use crate::{
    error::TaskError,
    types::{TaskPriority, TaskRecord, TaskStatus, TaskTransition},
};

/// SQLite-backed task store.
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, TaskError> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), TaskError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id               TEXT PRIMARY KEY,
                tenant_id             TEXT NOT NULL,
                kind                  TEXT NOT NULL,
                priority              TEXT NOT NULL,
                priority_rank         INTEGER NOT NULL,
                payload               TEXT NOT NULL,
                status                TEXT NOT NULL,
                required_capabilities TEXT NOT NULL,
                assigned_agent_id     TEXT,
                delegations_remaining INTEGER NOT NULL,
                idempotency_key       TEXT,
                created_at            TEXT NOT NULL,
                updated_at            TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_tenant_status
             ON tasks (tenant_id, status, priority_rank, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_transitions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id     TEXT NOT NULL,
                from_status TEXT NOT NULL,
                to_status   TEXT NOT NULL,
                actor       TEXT NOT NULL,
                reason      TEXT NOT NULL,
                at          TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS idempotency_keys (
                idem_key   TEXT NOT NULL,
                tenant_id  TEXT NOT NULL,
                task_id    TEXT NOT NULL,
                payload_fp TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, idem_key)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, task: &TaskRecord) -> Result<(), TaskError> {
        sqlx::query(
            "INSERT INTO tasks (task_id, tenant_id, kind, priority, priority_rank, payload,
                                status, required_capabilities, assigned_agent_id,
                                delegations_remaining, idempotency_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.task_id.to_string())
        .bind(task.tenant_id.to_string())
        .bind(&task.kind)
        .bind(task.priority.as_str())
        .bind(task.priority.rank())
        .bind(serde_json::to_string(&task.payload)?)
        .bind(task.status.as_str())
        .bind(serde_json::to_string(&task.required_capabilities)?)
        .bind(task.assigned_agent_id.map(|a| a.to_string()))
        .bind(i64::from(task.delegations_remaining))
        .bind(task.idempotency_key.as_deref())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId, task_id: TaskId) -> Result<TaskRecord, TaskError> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT task_id, tenant_id, kind, priority, payload, status,
                    required_capabilities, assigned_agent_id, delegations_remaining,
                    idempotency_key, created_at, updated_at
             FROM tasks WHERE task_id = ? AND tenant_id = ?",
        )
        .bind(task_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(TaskError::NotFound)?.into_record()
    }

    /// Persist a status change and append to the history atomically.
    pub async fn apply_transition(
        &self,
        task: &TaskRecord,
        transition: &TaskTransition,
        assigned_agent_id: Option<AgentId>,
        delegations_remaining: u32,
    ) -> Result<(), TaskError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE tasks SET status = ?, assigned_agent_id = ?, delegations_remaining = ?,
                              updated_at = ?
             WHERE task_id = ?",
        )
        .bind(transition.to.as_str())
        .bind(assigned_agent_id.map(|a| a.to_string()))
        .bind(i64::from(delegations_remaining))
        .bind(transition.at.to_rfc3339())
        .bind(task.task_id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO task_transitions (task_id, from_status, to_status, actor, reason, at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task.task_id.to_string())
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&transition.actor)
        .bind(&transition.reason)
        .bind(transition.at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn history(&self, task_id: TaskId) -> Result<Vec<TaskTransition>, TaskError> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT from_status, to_status, actor, reason, at
             FROM task_transitions WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(from, to, actor, reason, at)| {
                Ok(TaskTransition {
                    from: TaskStatus::parse(&from).ok_or(TaskError::NotFound)?,
                    to: TaskStatus::parse(&to).ok_or(TaskError::NotFound)?,
                    actor,
                    reason,
                    at: parse_time(&at),
                })
            })
            .collect()
    }

    /// Assignable tasks in dequeue order: priority rank, then FIFO.
    ///
    /// Covers freshly submitted tasks and delegated ones waiting for a new
    /// agent.
    pub async fn next_pending(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT task_id, tenant_id, kind, priority, payload, status,
                    required_capabilities, assigned_agent_id, delegations_remaining,
                    idempotency_key, created_at, updated_at
             FROM tasks WHERE tenant_id = ? AND status IN ('pending', 'delegated')
             ORDER BY priority_rank, created_at
             LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_record).collect()
    }

    /// Tasks in progress since before `cutoff` (escalation candidates).
    pub async fn stalled_in_progress(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, TaskError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT task_id, tenant_id, kind, priority, payload, status,
                    required_capabilities, assigned_agent_id, delegations_remaining,
                    idempotency_key, created_at, updated_at
             FROM tasks WHERE status = 'in_progress' AND updated_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_record).collect()
    }

    // ── Idempotency keys ────────────────────────────────────────────────────

    /// Insert-if-absent: the serialization point for duplicate suppression.
    ///
    /// Returns `None` if this call claimed the key, otherwise the task id of
    /// the existing claim (after verifying the payload fingerprint matches).
    pub async fn claim_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
        task_id: TaskId,
        payload_fingerprint: &str,
        ttl: std::time::Duration,
    ) -> Result<Option<TaskId>, TaskError> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();

        // Expired claims are dead; clear them so the key can be reused.
        sqlx::query(
            "DELETE FROM idempotency_keys
             WHERE tenant_id = ? AND idem_key = ? AND expires_at < ?",
        )
        .bind(tenant_id.to_string())
        .bind(key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO idempotency_keys
                (idem_key, tenant_id, task_id, payload_fp, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(tenant_id.to_string())
        .bind(task_id.to_string())
        .bind(payload_fingerprint)
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(None);
        }

        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT task_id, payload_fp FROM idempotency_keys
             WHERE tenant_id = ? AND idem_key = ?",
        )
        .bind(tenant_id.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some((existing_task, existing_fp)) => {
                if existing_fp != payload_fingerprint {
                    return Err(TaskError::IdempotencyConflict);
                }
                Ok(existing_task.parse().ok())
            },
        }
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    tenant_id: String,
    kind: String,
    priority: String,
    payload: String,
    status: String,
    required_capabilities: String,
    assigned_agent_id: Option<String>,
    delegations_remaining: i64,
    idempotency_key: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn into_record(self) -> Result<TaskRecord, TaskError> {
        Ok(TaskRecord {
            task_id: self.task_id.parse().map_err(|_| TaskError::NotFound)?,
            tenant_id: self.tenant_id.parse().map_err(|_| TaskError::NotFound)?,
            kind: self.kind,
            priority: TaskPriority::parse(&self.priority).unwrap_or(TaskPriority::Medium),
            payload: serde_json::from_str(&self.payload)?,
            status: TaskStatus::parse(&self.status).ok_or(TaskError::NotFound)?,
            required_capabilities: serde_json::from_str(&self.required_capabilities)?,
            assigned_agent_id: self.assigned_agent_id.and_then(|a| a.parse().ok()),
            delegations_remaining: self.delegations_remaining.max(0) as u32,
            idempotency_key: self.idempotency_key,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
        })
    }
}
