//! The asynchronous worker path: pending-first consumption, idempotent
//! effects, bounded retries, dead-lettering.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    flate2::read::GzDecoder,
    std::io::Read,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use {
    relay_common::TenantId,
    relay_metrics::{counter, labels, names},
    relay_queue::{
        DeadLetter, DeadLetterReason, Delivered, QueueError, StreamQueue, dlq_stream,
        webhook_stream,
    },
};

use crate::types::WebhookEvent;

/// What the handler decided about one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerVerdict {
    /// Effect applied (or already applied previously — idempotent).
    Ok,
    /// Transient failure; leave the entry pending for reclaim.
    Retry(String),
    /// Permanent failure; dead-letter immediately.
    Fatal(String),
}

/// Downstream effect of a webhook event.
///
/// Implementations must be idempotent per event id: the queue is
/// at-least-once, so the same event can arrive more than once. The stock
/// handler routes through the task engine's idempotency store, which makes
/// task creation exactly-once.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> HandlerVerdict;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub group: String,
    pub visibility_timeout: Duration,
    pub max_attempts: u32,
    pub read_count: usize,
    pub block: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            group: "webhook-workers".into(),
            visibility_timeout: Duration::from_secs(30),
            max_attempts: 5,
            read_count: 16,
            block: Duration::from_secs(2),
        }
    }
}

/// Consumes one tenant's webhook stream.
pub struct WorkerPool<Q: StreamQueue + ?Sized> {
    queue: Arc<Q>,
    handler: Arc<dyn WebhookHandler>,
    options: WorkerOptions,
}

impl<Q: StreamQueue + ?Sized> WorkerPool<Q> {
    #[must_use]
    pub fn new(queue: Arc<Q>, handler: Arc<dyn WebhookHandler>, options: WorkerOptions) -> Self {
        Self {
            queue,
            handler,
            options,
        }
    }

    /// Run a consumer loop until cancelled.
    pub async fn run_consumer(
        &self,
        tenant: TenantId,
        consumer: &str,
        cancel: CancellationToken,
    ) {
        info!(tenant_id = %tenant, consumer, "webhook consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.process_once(tenant, consumer) => {
                    if let Err(e) = result {
                        warn!(tenant_id = %tenant, consumer, error = %e, "consumer iteration failed");
                        // Transient backend trouble: back off briefly.
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
        info!(tenant_id = %tenant, consumer, "webhook consumer stopped");
    }

    /// One iteration: reclaim idle entries, then read and process a batch.
    /// Returns the number of entries handled.
    pub async fn process_once(
        &self,
        tenant: TenantId,
        consumer: &str,
    ) -> Result<usize, QueueError> {
        let stream = webhook_stream(tenant);
        let mut handled = 0;

        // Reclaim entries whose consumer went quiet past the visibility
        // timeout; ownership transfers to us with the delivery count bumped.
        let idle = self
            .queue
            .pending(&stream, &self.options.group, self.options.visibility_timeout)
            .await?;
        if !idle.is_empty() {
            let ids: Vec<String> = idle.into_iter().map(|p| p.id).collect();
            let reclaimed = self
                .queue
                .claim(&stream, &self.options.group, consumer, &ids)
                .await?;
            for delivered in reclaimed {
                self.process_entry(tenant, &stream, &delivered).await?;
                handled += 1;
            }
        }

        let batch = self
            .queue
            .read(
                &stream,
                &self.options.group,
                consumer,
                self.options.read_count,
                self.options.block,
            )
            .await?;
        for delivered in batch {
            self.process_entry(tenant, &stream, &delivered).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn process_entry(
        &self,
        tenant: TenantId,
        stream: &str,
        delivered: &Delivered,
    ) -> Result<(), QueueError> {
        let event = match decode_event(&delivered.message) {
            Ok(event) => event,
            Err(message) => {
                error!(entry_id = %delivered.id, %message, "undecodable stream entry");
                return self
                    .bury(
                        tenant,
                        stream,
                        delivered,
                        DeadLetterReason::Undecodable(message),
                    )
                    .await;
            },
        };

        match self.handler.handle(&event).await {
            HandlerVerdict::Ok => {
                self.queue
                    .ack(stream, &self.options.group, &delivered.id)
                    .await
            },
            HandlerVerdict::Fatal(reason) => {
                warn!(entry_id = %delivered.id, reason, "fatal handler failure");
                self.bury(tenant, stream, delivered, DeadLetterReason::Fatal(reason))
                    .await
            },
            HandlerVerdict::Retry(reason) => {
                if delivered.attempts >= self.options.max_attempts {
                    warn!(
                        entry_id = %delivered.id,
                        attempts = delivered.attempts,
                        reason,
                        "retry budget exhausted"
                    );
                    self.bury(
                        tenant,
                        stream,
                        delivered,
                        DeadLetterReason::AttemptsExhausted {
                            attempts: delivered.attempts,
                        },
                    )
                    .await
                } else {
                    // No ack: the entry stays pending and is redelivered to
                    // us (pending-first) or reclaimed after the visibility
                    // timeout.
                    Ok(())
                }
            },
        }
    }

    async fn bury(
        &self,
        tenant: TenantId,
        stream: &str,
        delivered: &Delivered,
        reason: DeadLetterReason,
    ) -> Result<(), QueueError> {
        let letter = DeadLetter {
            original: delivered.message.clone(),
            reason,
            failed_at: chrono::Utc::now(),
        };
        self.queue
            .dead_letter(
                stream,
                &dlq_stream(tenant),
                &self.options.group,
                &delivered.id,
                &letter,
            )
            .await?;
        counter!(
            names::DEAD_LETTERED_TOTAL,
            labels::TENANT => tenant.to_string(),
            labels::COMPONENT => "webhooks",
        )
        .increment(1);
        Ok(())
    }
}

/// Decode a stream message into an event, inflating compressed payloads.
pub fn decode_event(message: &relay_queue::QueueMessage) -> Result<WebhookEvent, String> {
    let bytes = if message.compressed {
        let mut decoder = GzDecoder::new(message.payload.as_slice());
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| format!("inflate failed: {e}"))?;
        inflated
    } else {
        message.payload.clone()
    };
    serde_json::from_slice(&bytes).map_err(|e| format!("bad event json: {e}"))
}
