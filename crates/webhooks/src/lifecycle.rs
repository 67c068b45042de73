//! Hot / warm / cold lifecycle maintenance.
//!
//! A periodic pass walks each tenant stream from the tail: entries past the
//! warm boundary are exported to the archive and removed; entries past the
//! hot boundary are gzip-compressed in place; finally the stream is trimmed
//! to its length bound.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    flate2::{Compression, write::GzEncoder},
    std::io::Write,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    relay_common::TenantId,
    relay_queue::{QueueError, StreamQueue, webhook_stream},
};

use crate::{archive::FsArchive, worker::decode_event};

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Entries younger than this keep their full payload.
    pub hot_ttl: Duration,
    /// Entries younger than this (but past hot) are compressed in place;
    /// older entries are archived and removed.
    pub warm_ttl: Duration,
    pub max_stream_len: u64,
    pub interval: Duration,
    /// Entries examined per stream per pass.
    pub scan_batch: usize,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            hot_ttl: Duration::from_secs(7_200),
            warm_ttl: Duration::from_secs(86_400),
            max_stream_len: 1_000_000,
            interval: Duration::from_secs(300),
            scan_batch: 512,
        }
    }
}

/// Per-pass accounting, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleReport {
    pub compressed: usize,
    pub archived: usize,
}

/// Drives the lifecycle for a set of tenant streams.
pub struct LifecycleMaintainer<Q: StreamQueue + ?Sized> {
    queue: Arc<Q>,
    archive: Arc<FsArchive>,
    options: LifecycleOptions,
}

impl<Q: StreamQueue + ?Sized> LifecycleMaintainer<Q> {
    #[must_use]
    pub fn new(queue: Arc<Q>, archive: Arc<FsArchive>, options: LifecycleOptions) -> Self {
        Self {
            queue,
            archive,
            options,
        }
    }

    /// Run until cancelled. `tenants` is re-evaluated each pass so newly
    /// registered tenants join maintenance without a restart.
    pub async fn run(
        &self,
        tenants: impl Fn() -> Vec<TenantId> + Send + Sync,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for tenant in tenants() {
                        match self.maintain_tenant(tenant).await {
                            Ok(report) if report.archived + report.compressed > 0 => {
                                info!(
                                    tenant_id = %tenant,
                                    compressed = report.compressed,
                                    archived = report.archived,
                                    "lifecycle pass"
                                );
                            },
                            Ok(_) => {},
                            Err(e) => {
                                warn!(tenant_id = %tenant, error = %e, "lifecycle pass failed");
                            },
                        }
                    }
                }
            }
        }
    }

    /// One maintenance pass over a tenant's stream.
    pub async fn maintain_tenant(&self, tenant: TenantId) -> Result<LifecycleReport, QueueError> {
        let stream = webhook_stream(tenant);
        let now = Utc::now();
        let mut report = LifecycleReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let batch = self
                .queue
                .scan(&stream, cursor.clone(), self.options.scan_batch)
                .await?;
            if batch.is_empty() {
                break;
            }
            cursor = Some(batch[batch.len() - 1].0.clone());

            let mut to_delete = Vec::new();
            for (entry_id, message) in &batch {
                let age = now
                    .signed_duration_since(message.first_enqueued_at)
                    .to_std()
                    .unwrap_or_default();

                if age >= self.options.warm_ttl {
                    // Cold: export then drop. The archive write lands before
                    // the delete, so a crash in between leaves a duplicate
                    // archive key at worst.
                    match decode_event(message) {
                        Ok(event) => {
                            if let Err(e) = self.archive.store(&event).await {
                                warn!(entry_id, error = %e, "archive export failed; keeping entry");
                                continue;
                            }
                            to_delete.push(entry_id.clone());
                            report.archived += 1;
                        },
                        Err(message) => {
                            warn!(entry_id, %message, "unreadable entry during archival");
                        },
                    }
                } else if age >= self.options.hot_ttl && !message.compressed {
                    // Warm: compress in place.
                    let mut compressed = message.clone();
                    compressed.payload = gzip(&message.payload)?;
                    compressed.compressed = true;
                    self.queue.replace(&stream, entry_id, &compressed).await?;
                    report.compressed += 1;
                }

                // Entries younger than the hot boundary are untouched, and
                // the stream is time-ordered: everything after this is
                // younger still.
                if age < self.options.hot_ttl {
                    self.queue.delete(&stream, &to_delete).await?;
                    self.queue.trim(&stream, self.options.max_stream_len).await?;
                    return Ok(report);
                }
            }
            self.queue.delete(&stream, &to_delete).await?;

            if batch.len() < self.options.scan_batch {
                break;
            }
        }

        self.queue.trim(&stream, self.options.max_stream_len).await?;
        Ok(report)
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, QueueError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|e| QueueError::Backend(format!("compression failed: {e}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::WebhookEvent,
        relay_queue::{MemoryQueue, QueueMessage},
    };

    async fn enqueue_aged(
        queue: &MemoryQueue,
        tenant: TenantId,
        age: Duration,
    ) -> WebhookEvent {
        let mut event = WebhookEvent::new(tenant, "github", "push", "d", b"{\"x\":1}".to_vec());
        event.received_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let message = QueueMessage {
            event_id: event.event_id,
            tenant_id: tenant,
            payload: serde_json::to_vec(&event).unwrap(),
            first_enqueued_at: event.received_at,
            compressed: false,
        };
        queue
            .publish(&webhook_stream(tenant), &message)
            .await
            .unwrap();
        event
    }

    fn maintainer(
        queue: Arc<MemoryQueue>,
        archive: Arc<FsArchive>,
    ) -> LifecycleMaintainer<MemoryQueue> {
        LifecycleMaintainer::new(queue, archive, LifecycleOptions {
            hot_ttl: Duration::from_secs(7_200),
            warm_ttl: Duration::from_secs(86_400),
            max_stream_len: 1_000,
            interval: Duration::from_secs(300),
            scan_batch: 512,
        })
    }

    #[tokio::test]
    async fn hot_entries_are_left_alone() {
        let queue = Arc::new(MemoryQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        enqueue_aged(&queue, tenant, Duration::from_secs(60)).await;

        let m = maintainer(Arc::clone(&queue), Arc::new(FsArchive::new(dir.path())));
        let report = m.maintain_tenant(tenant).await.unwrap();
        assert_eq!(report, LifecycleReport::default());

        let entries = queue
            .scan(&webhook_stream(tenant), None, 10)
            .await
            .unwrap();
        assert!(!entries[0].1.compressed);
    }

    #[tokio::test]
    async fn warm_entries_are_compressed_and_still_decodable() {
        let queue = Arc::new(MemoryQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        let event = enqueue_aged(&queue, tenant, Duration::from_secs(10_000)).await;

        let m = maintainer(Arc::clone(&queue), Arc::new(FsArchive::new(dir.path())));
        let report = m.maintain_tenant(tenant).await.unwrap();
        assert_eq!(report.compressed, 1);

        let entries = queue
            .scan(&webhook_stream(tenant), None, 10)
            .await
            .unwrap();
        assert!(entries[0].1.compressed);
        let decoded = decode_event(&entries[0].1).unwrap();
        assert_eq!(decoded.event_id, event.event_id);

        // A second pass leaves the already-compressed entry alone.
        let report = m.maintain_tenant(tenant).await.unwrap();
        assert_eq!(report.compressed, 0);
    }

    #[tokio::test]
    async fn cold_entries_are_archived_and_removed() {
        let queue = Arc::new(MemoryQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(FsArchive::new(dir.path()));
        let tenant = TenantId::new();
        let event = enqueue_aged(&queue, tenant, Duration::from_secs(100_000)).await;

        let m = maintainer(Arc::clone(&queue), Arc::clone(&archive));
        let report = m.maintain_tenant(tenant).await.unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(queue.len(&webhook_stream(tenant)).await.unwrap(), 0);

        let date = event.received_at.format("%Y-%m-%d").to_string();
        let restored = archive.load(tenant, &date, event.event_id).await.unwrap();
        assert_eq!(restored.event_id, event.event_id);
    }

    #[tokio::test]
    async fn mixed_ages_settle_into_their_tiers() {
        let queue = Arc::new(MemoryQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        enqueue_aged(&queue, tenant, Duration::from_secs(100_000)).await; // cold
        enqueue_aged(&queue, tenant, Duration::from_secs(10_000)).await; // warm
        enqueue_aged(&queue, tenant, Duration::from_secs(60)).await; // hot

        let m = maintainer(Arc::clone(&queue), Arc::new(FsArchive::new(dir.path())));
        let report = m.maintain_tenant(tenant).await.unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.compressed, 1);
        assert_eq!(queue.len(&webhook_stream(tenant)).await.unwrap(), 2);
    }
}
