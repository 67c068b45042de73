//! The synchronous ingress path: verify → dedup → enqueue.
//!
//! Budget is ~200ms p99, so everything here is memory-bound except the
//! single queue publish.

use std::{sync::Arc, time::Instant};

use {secrecy::SecretString, tracing::info};

use {
    relay_common::TenantId,
    relay_metrics::{counter, histogram, labels, names},
    relay_queue::{QueueMessage, StreamQueue, webhook_stream},
};

use crate::{
    dedup::DedupFilter, error::WebhookError, signature::verify_signature, types::WebhookEvent,
};

/// What ingress tells the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Enqueued; the entry id is the stream position.
    Accepted { entry_id: String },
    /// Suppressed as a duplicate; nothing was enqueued.
    Deduplicated,
}

/// Verifies and enqueues webhook deliveries.
pub struct WebhookIngress<Q: StreamQueue + ?Sized> {
    queue: Arc<Q>,
    dedup: DedupFilter,
    max_payload_bytes: usize,
    high_water_mark: u64,
}

impl<Q: StreamQueue + ?Sized> WebhookIngress<Q> {
    #[must_use]
    pub fn new(
        queue: Arc<Q>,
        dedup: DedupFilter,
        max_payload_bytes: usize,
        high_water_mark: u64,
    ) -> Self {
        Self {
            queue,
            dedup,
            max_payload_bytes,
            high_water_mark,
        }
    }

    /// Handle one delivery. The caller has already resolved the tenant and
    /// fetched its webhook secret.
    pub async fn handle(
        &self,
        tenant_id: TenantId,
        provider: &str,
        event_type: &str,
        delivery_id: &str,
        signature: Option<&str>,
        secret: &SecretString,
        body: &[u8],
    ) -> Result<IngressOutcome, WebhookError> {
        let started = Instant::now();

        if body.len() > self.max_payload_bytes {
            return Err(WebhookError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_payload_bytes,
            });
        }

        let Some(signature) = signature else {
            return Err(WebhookError::BadSignature);
        };
        if !verify_signature(secret, body, signature) {
            counter!(
                names::ERRORS_TOTAL,
                labels::TENANT => tenant_id.to_string(),
                labels::COMPONENT => "webhooks",
                labels::OUTCOME => "bad_signature",
            )
            .increment(1);
            return Err(WebhookError::BadSignature);
        }

        let event = WebhookEvent::new(tenant_id, provider, event_type, delivery_id, body.to_vec());

        if self
            .dedup
            .check_and_insert(tenant_id, provider, delivery_id, &event.fingerprint)
        {
            counter!(
                names::DEDUP_HITS_TOTAL,
                labels::TENANT => tenant_id.to_string(),
                labels::COMPONENT => "webhooks",
            )
            .increment(1);
            return Ok(IngressOutcome::Deduplicated);
        }

        // Per-tenant fairness: a noisy tenant saturates its own stream and
        // gets 429s; other tenants' streams are untouched.
        let stream = webhook_stream(tenant_id);
        if self.queue.len(&stream).await? >= self.high_water_mark {
            return Err(WebhookError::Backpressure);
        }

        let message = QueueMessage {
            event_id: event.event_id,
            tenant_id,
            payload: serde_json::to_vec(&event).map_err(relay_queue::QueueError::from)?,
            first_enqueued_at: event.received_at,
            compressed: false,
        };
        let entry_id = self.queue.publish(&stream, &message).await?;

        histogram!(
            names::WEBHOOK_ENQUEUE_LATENCY_SECONDS,
            labels::TENANT => tenant_id.to_string(),
            labels::COMPONENT => "webhooks",
        )
        .record(started.elapsed().as_secs_f64());
        counter!(
            names::REQUESTS_TOTAL,
            labels::TENANT => tenant_id.to_string(),
            labels::COMPONENT => "webhooks",
        )
        .increment(1);
        info!(
            tenant_id = %tenant_id,
            provider,
            event_type,
            delivery_id,
            entry_id,
            "webhook accepted"
        );

        Ok(IngressOutcome::Accepted { entry_id })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::signature::sign,
        relay_queue::MemoryQueue,
        std::{collections::HashMap, time::Duration},
    };

    fn ingress(queue: Arc<MemoryQueue>) -> WebhookIngress<MemoryQueue> {
        WebhookIngress::new(
            queue,
            DedupFilter::new(Duration::from_secs(300), HashMap::new()),
            1024 * 1024,
            100,
        )
    }

    fn secret() -> SecretString {
        SecretString::new("whsec_test".into())
    }

    #[tokio::test]
    async fn accepts_and_enqueues_a_valid_delivery() {
        let queue = Arc::new(MemoryQueue::new());
        let ingress = ingress(Arc::clone(&queue));
        let tenant = TenantId::new();
        let body = br#"{"action": "opened"}"#;
        let signature = sign(&secret(), body);

        let outcome = ingress
            .handle(
                tenant,
                "github",
                "issues",
                "d1",
                Some(&signature),
                &secret(),
                body,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IngressOutcome::Accepted { .. }));
        assert_eq!(queue.len(&webhook_stream(tenant)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_suppressed_without_enqueue() {
        let queue = Arc::new(MemoryQueue::new());
        let ingress = ingress(Arc::clone(&queue));
        let tenant = TenantId::new();
        let body = br#"{"n": 1}"#;
        let signature = sign(&secret(), body);

        let first = ingress
            .handle(
                tenant,
                "github",
                "push",
                "d1",
                Some(&signature),
                &secret(),
                body,
            )
            .await
            .unwrap();
        assert!(matches!(first, IngressOutcome::Accepted { .. }));

        let second = ingress
            .handle(
                tenant,
                "github",
                "push",
                "d1",
                Some(&signature),
                &secret(),
                body,
            )
            .await
            .unwrap();
        assert_eq!(second, IngressOutcome::Deduplicated);
        assert_eq!(queue.len(&webhook_stream(tenant)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let ingress = ingress(Arc::clone(&queue));
        let tenant = TenantId::new();

        let result = ingress
            .handle(
                tenant,
                "github",
                "push",
                "d1",
                Some("sha256=deadbeef"),
                &secret(),
                b"body",
            )
            .await;
        assert!(matches!(result, Err(WebhookError::BadSignature)));

        let result = ingress
            .handle(tenant, "github", "push", "d1", None, &secret(), b"body")
            .await;
        assert!(matches!(result, Err(WebhookError::BadSignature)));
        assert_eq!(queue.len(&webhook_stream(tenant)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let ingress = WebhookIngress::new(
            queue,
            DedupFilter::new(Duration::from_secs(300), HashMap::new()),
            16,
            100,
        );
        let body = vec![b'x'; 64];
        let signature = sign(&secret(), &body);
        let result = ingress
            .handle(
                TenantId::new(),
                "github",
                "push",
                "d1",
                Some(&signature),
                &secret(),
                &body,
            )
            .await;
        assert!(matches!(result, Err(WebhookError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn tenant_over_high_water_mark_gets_backpressure() {
        let queue = Arc::new(MemoryQueue::new());
        let ingress = WebhookIngress::new(
            Arc::clone(&queue),
            DedupFilter::new(Duration::from_secs(300), HashMap::new()),
            1024 * 1024,
            2,
        );
        let noisy = TenantId::new();
        let quiet = TenantId::new();

        for i in 0..2 {
            let body = format!("{{\"n\": {i}}}").into_bytes();
            let signature = sign(&secret(), &body);
            ingress
                .handle(
                    noisy,
                    "github",
                    "push",
                    &format!("d{i}"),
                    Some(&signature),
                    &secret(),
                    &body,
                )
                .await
                .unwrap();
        }

        let body = br#"{"n": 99}"#;
        let signature = sign(&secret(), body);
        let result = ingress
            .handle(
                noisy,
                "github",
                "push",
                "d99",
                Some(&signature),
                &secret(),
                body,
            )
            .await;
        assert!(matches!(result, Err(WebhookError::Backpressure)));

        // Fairness: the quiet tenant is unaffected.
        let outcome = ingress
            .handle(
                quiet,
                "github",
                "push",
                "d1",
                Some(&signature),
                &secret(),
                body,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IngressOutcome::Accepted { .. }));
    }
}
