//! The stock webhook handler: materialize events into tasks and notify
//! subscribed sessions.

use std::sync::Arc;

use {async_trait::async_trait, tracing::debug};

use {
    relay_protocol::{JsonRpcNotification, methods},
    relay_sessions::SessionRegistry,
    relay_tasks::{NewTask, TaskEngine, TaskError, TaskPriority, TaskRecord},
    relay_webhooks::{HandlerVerdict, WebhookEvent, WebhookHandler},
};

/// Converts webhook events into tasks, exactly once per event.
///
/// Idempotency comes from the task engine's key store: the event id is the
/// submission key, so an at-least-once redelivery returns the existing task
/// instead of creating a second one.
pub struct TaskMaterializer {
    tasks: Arc<TaskEngine>,
    sessions: Arc<SessionRegistry>,
}

impl TaskMaterializer {
    #[must_use]
    pub fn new(tasks: Arc<TaskEngine>, sessions: Arc<SessionRegistry>) -> Self {
        Self { tasks, sessions }
    }
}

#[async_trait]
impl WebhookHandler for TaskMaterializer {
    async fn handle(&self, event: &WebhookEvent) -> HandlerVerdict {
        let payload = match serde_json::from_slice::<serde_json::Value>(&event.payload) {
            Ok(value) => value,
            // Non-JSON providers still get a task; the raw body rides along.
            Err(_) => serde_json::json!({
                "raw": String::from_utf8_lossy(&event.payload),
            }),
        };

        let submission = NewTask {
            kind: format!("webhook.{}.{}", event.provider, event.event_type),
            priority: TaskPriority::Medium,
            payload: serde_json::json!({
                "delivery_id": event.delivery_id,
                "provider": event.provider,
                "event_type": event.event_type,
                "body": payload,
            }),
            required_capabilities: Vec::new(),
            idempotency_key: Some(format!("evt:{}", event.event_id)),
        };

        match self.tasks.submit(event.tenant_id, submission).await {
            Ok(task) => {
                debug!(task_id = %task.task_id, kind = %task.kind, "task materialized");
                notify_task_update(&self.sessions, &task, "created").await;
                HandlerVerdict::Ok
            },
            Err(TaskError::IdempotencyConflict) => {
                // Same event id, different payload: corrupt replay. Bury it.
                HandlerVerdict::Fatal("idempotency key conflict".into())
            },
            Err(TaskError::Database(e)) => HandlerVerdict::Retry(e.to_string()),
            Err(e) => HandlerVerdict::Fatal(e.to_string()),
        }
    }
}

/// Push a task-update notification to every initialized session of the
/// task's tenant.
pub async fn notify_task_update(sessions: &SessionRegistry, task: &TaskRecord, change: &str) {
    let notification = JsonRpcNotification::new(
        methods::TASK_NOTIFICATION,
        Some(serde_json::json!({
            "taskId": task.task_id,
            "kind": task.kind,
            "status": task.status,
            "priority": task.priority,
            "change": change,
        })),
    );
    let Ok(frame) = serde_json::to_string(&notification) else {
        return;
    };
    let delivered = sessions.notify_tenant(task.tenant_id, &frame).await;
    debug!(task_id = %task.task_id, delivered, change, "task notification fanned out");
}
