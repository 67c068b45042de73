//! In-memory [`StreamQueue`] backend for tests and single-node runs.
//!
//! Mirrors Redis Streams semantics closely enough that the worker loop and
//! lifecycle maintainer behave identically on either backend.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    tokio::sync::{Mutex, Notify},
};

use crate::{
    error::QueueError,
    traits::StreamQueue,
    types::{DeadLetter, Delivered, EntryId, PendingInfo, QueueMessage},
};

/// Numeric form of a `{millis}-{seq}` entry id, ordered correctly.
type IdKey = (u64, u64);

fn parse_id(id: &str) -> Result<IdKey, QueueError> {
    let (ms, seq) = id
        .split_once('-')
        .ok_or_else(|| QueueError::Backend(format!("malformed entry id: {id}")))?;
    let ms = ms
        .parse()
        .map_err(|_| QueueError::Backend(format!("malformed entry id: {id}")))?;
    let seq = seq
        .parse()
        .map_err(|_| QueueError::Backend(format!("malformed entry id: {id}")))?;
    Ok((ms, seq))
}

fn format_id(key: IdKey) -> EntryId {
    format!("{}-{}", key.0, key.1)
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    last_delivery: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest id handed out as "new" to any consumer.
    last_delivered: Option<IdKey>,
    pending: HashMap<IdKey, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<IdKey, QueueMessage>,
    groups: HashMap<String, GroupState>,
    last_id: IdKey,
}

impl StreamState {
    fn next_id(&mut self) -> IdKey {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let key = if now_ms > self.last_id.0 {
            (now_ms, 0)
        } else {
            (self.last_id.0, self.last_id.1 + 1)
        };
        self.last_id = key;
        key
    }
}

/// In-memory queue; cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    published: Arc<Notify>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_stream<T>(
        &self,
        stream: &str,
        f: impl FnOnce(&mut StreamState) -> T,
    ) -> T {
        let mut streams = self.streams.lock().await;
        f(streams.entry(stream.to_string()).or_default())
    }

    fn read_locked(
        state: &mut StreamState,
        group: &str,
        consumer: &str,
        count: usize,
        now: Instant,
    ) -> Vec<Delivered> {
        let group_state = state.groups.entry(group.to_string()).or_default();
        let mut out = Vec::new();

        // Pending-first: this consumer's own unacked entries, oldest first.
        let mut own: Vec<IdKey> = group_state
            .pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .map(|(id, _)| *id)
            .collect();
        own.sort_unstable();
        for id in own.into_iter().take(count) {
            match (state.entries.get(&id), group_state.pending.get_mut(&id)) {
                (Some(message), Some(pending)) => {
                    pending.deliveries += 1;
                    pending.last_delivery = now;
                    out.push(Delivered {
                        id: format_id(id),
                        message: message.clone(),
                        attempts: pending.deliveries,
                    });
                },
                _ => {
                    // Entry was trimmed or deleted from under the group.
                    group_state.pending.remove(&id);
                },
            }
        }

        // Then new entries beyond the group's high-water mark.
        let start = group_state.last_delivered;
        let range = state.entries.range((
            start.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded),
            std::ops::Bound::Unbounded,
        ));
        for (&id, message) in range {
            if out.len() >= count {
                break;
            }
            group_state.last_delivered = Some(id);
            group_state.pending.insert(id, PendingEntry {
                consumer: consumer.to_string(),
                last_delivery: now,
                deliveries: 1,
            });
            out.push(Delivered {
                id: format_id(id),
                message: message.clone(),
                attempts: 1,
            });
        }

        out
    }
}

#[async_trait]
impl StreamQueue for MemoryQueue {
    async fn publish(&self, stream: &str, message: &QueueMessage) -> Result<EntryId, QueueError> {
        let id = self
            .with_stream(stream, |state| {
                let id = state.next_id();
                state.entries.insert(id, message.clone());
                id
            })
            .await;
        self.published.notify_waiters();
        Ok(format_id(id))
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivered>, QueueError> {
        let now = Instant::now();
        let delivered = self
            .with_stream(stream, |state| {
                Self::read_locked(state, group, consumer, count, now)
            })
            .await;
        if !delivered.is_empty() || block.is_zero() {
            return Ok(delivered);
        }

        // Nothing available: wait for a publish, then try once more.
        let notified = self.published.notified();
        let _ = tokio::time::timeout(block, notified).await;
        let now = Instant::now();
        Ok(self
            .with_stream(stream, |state| {
                Self::read_locked(state, group, consumer, count, now)
            })
            .await)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let key = parse_id(id)?;
        self.with_stream(stream, |state| {
            let group_state = state.groups.entry(group.to_string()).or_default();
            if group_state.pending.remove(&key).is_none() {
                return Err(QueueError::NotPending(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<PendingInfo>, QueueError> {
        let now = Instant::now();
        Ok(self
            .with_stream(stream, |state| {
                let Some(group_state) = state.groups.get(group) else {
                    return Vec::new();
                };
                let mut infos: Vec<PendingInfo> = group_state
                    .pending
                    .iter()
                    .filter_map(|(id, p)| {
                        let idle = now.duration_since(p.last_delivery);
                        (idle >= min_idle).then(|| PendingInfo {
                            id: format_id(*id),
                            consumer: p.consumer.clone(),
                            idle,
                            deliveries: p.deliveries,
                        })
                    })
                    .collect();
                infos.sort_by(|a, b| a.id.cmp(&b.id));
                infos
            })
            .await)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<Vec<Delivered>, QueueError> {
        let now = Instant::now();
        let keys: Vec<IdKey> = ids.iter().map(|id| parse_id(id)).collect::<Result<_, _>>()?;
        Ok(self
            .with_stream(stream, |state| {
                let mut out = Vec::new();
                let Some(group_state) = state.groups.get_mut(group) else {
                    return out;
                };
                for key in keys {
                    let Some(pending) = group_state.pending.get_mut(&key) else {
                        continue;
                    };
                    match state.entries.get(&key) {
                        Some(message) => {
                            pending.consumer = consumer.to_string();
                            pending.deliveries += 1;
                            pending.last_delivery = now;
                            out.push(Delivered {
                                id: format_id(key),
                                message: message.clone(),
                                attempts: pending.deliveries,
                            });
                        },
                        None => {
                            group_state.pending.remove(&key);
                        },
                    }
                }
                out
            })
            .await)
    }

    async fn dead_letter(
        &self,
        stream: &str,
        dlq: &str,
        group: &str,
        id: &str,
        letter: &DeadLetter,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(letter)?;
        let dlq_message = QueueMessage {
            event_id: letter.original.event_id,
            tenant_id: letter.original.tenant_id,
            payload,
            first_enqueued_at: letter.original.first_enqueued_at,
            compressed: false,
        };
        self.publish(dlq, &dlq_message).await?;

        let key = parse_id(id)?;
        self.with_stream(stream, |state| {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(&key);
            }
            state.entries.remove(&key);
        })
        .await;
        Ok(())
    }

    async fn len(&self, stream: &str) -> Result<u64, QueueError> {
        Ok(self
            .with_stream(stream, |state| state.entries.len() as u64)
            .await)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<(), QueueError> {
        self.with_stream(stream, |state| {
            while state.entries.len() as u64 > max_len {
                let Some((&oldest, _)) = state.entries.iter().next() else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        })
        .await;
        Ok(())
    }

    async fn scan(
        &self,
        stream: &str,
        start_exclusive: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<(EntryId, QueueMessage)>, QueueError> {
        let start = match start_exclusive {
            Some(id) => Some(parse_id(&id)?),
            None => None,
        };
        Ok(self
            .with_stream(stream, |state| {
                state
                    .entries
                    .range((
                        start.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded),
                        std::ops::Bound::Unbounded,
                    ))
                    .take(count)
                    .map(|(&id, message)| (format_id(id), message.clone()))
                    .collect()
            })
            .await)
    }

    async fn replace(
        &self,
        stream: &str,
        id: &str,
        message: &QueueMessage,
    ) -> Result<EntryId, QueueError> {
        let key = parse_id(id)?;
        let new_id = self
            .with_stream(stream, |state| {
                state.entries.remove(&key);
                for group_state in state.groups.values_mut() {
                    group_state.pending.remove(&key);
                }
                let new_key = state.next_id();
                state.entries.insert(new_key, message.clone());
                new_key
            })
            .await;
        Ok(format_id(new_id))
    }

    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<(), QueueError> {
        let keys: Vec<IdKey> = ids.iter().map(|id| parse_id(id)).collect::<Result<_, _>>()?;
        self.with_stream(stream, |state| {
            for key in keys {
                state.entries.remove(&key);
                for group_state in state.groups.values_mut() {
                    group_state.pending.remove(&key);
                }
            }
        })
        .await;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::DeadLetterReason,
        relay_common::{EventId, TenantId},
    };

    fn message(tenant: TenantId) -> QueueMessage {
        QueueMessage::new(EventId::new(), tenant, b"{\"n\":1}".to_vec())
    }

    #[tokio::test]
    async fn publish_assigns_monotonic_ids() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        let a = queue.publish("s", &message(tenant)).await.unwrap();
        let b = queue.publish("s", &message(tenant)).await.unwrap();
        assert!(parse_id(&b).unwrap() > parse_id(&a).unwrap());
        assert_eq!(queue.len("s").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn entry_goes_to_exactly_one_consumer() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        queue.publish("s", &message(tenant)).await.unwrap();

        let a = queue
            .read("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        let b = queue
            .read("s", "g", "c2", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn unacked_entries_redeliver_to_same_consumer_first() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        queue.publish("s", &message(tenant)).await.unwrap();
        queue.publish("s", &message(tenant)).await.unwrap();

        let first = queue.read("s", "g", "c1", 1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempts, 1);

        // Without an ack the same entry comes back first, attempts bumped.
        let again = queue.read("s", "g", "c1", 2, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].attempts, 2);
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        queue.publish("s", &message(tenant)).await.unwrap();
        let read = queue
            .read("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        queue.ack("s", "g", &read[0].id).await.unwrap();

        assert!(
            queue
                .read("s", "g", "c1", 10, Duration::ZERO)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            queue.ack("s", "g", &read[0].id).await,
            Err(QueueError::NotPending(_))
        ));
    }

    #[tokio::test]
    async fn idle_entries_are_claimable_by_another_consumer() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        queue.publish("s", &message(tenant)).await.unwrap();
        let read = queue
            .read("s", "g", "crashed", 10, Duration::ZERO)
            .await
            .unwrap();

        let idle = queue.pending("s", "g", Duration::ZERO).await.unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].consumer, "crashed");

        let claimed = queue
            .claim("s", "g", "rescuer", &[read[0].id.clone()])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);

        // Ownership moved: the original consumer no longer sees it.
        assert!(
            queue
                .read("s", "g", "crashed", 10, Duration::ZERO)
                .await
                .unwrap()
                .is_empty()
        );
        queue.ack("s", "g", &claimed[0].id).await.unwrap();
    }

    #[tokio::test]
    async fn pending_respects_min_idle() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        queue.publish("s", &message(tenant)).await.unwrap();
        queue
            .read("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        let idle = queue
            .pending("s", "g", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(idle.is_empty());
    }

    #[tokio::test]
    async fn dead_letter_moves_entry_to_dlq() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        let msg = message(tenant);
        queue.publish("s", &msg).await.unwrap();
        let read = queue
            .read("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        let letter = DeadLetter {
            original: msg,
            reason: DeadLetterReason::AttemptsExhausted { attempts: 5 },
            failed_at: chrono::Utc::now(),
        };
        queue
            .dead_letter("s", "s:dlq", "g", &read[0].id, &letter)
            .await
            .unwrap();

        assert_eq!(queue.len("s").await.unwrap(), 0);
        assert_eq!(queue.len("s:dlq").await.unwrap(), 1);
        let dlq = queue
            .scan("s:dlq", None, 10)
            .await
            .unwrap();
        let parsed: DeadLetter = serde_json::from_slice(&dlq[0].1.payload).unwrap();
        assert!(matches!(
            parsed.reason,
            DeadLetterReason::AttemptsExhausted { attempts: 5 }
        ));
    }

    #[tokio::test]
    async fn trim_drops_oldest() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        for _ in 0..5 {
            queue.publish("s", &message(tenant)).await.unwrap();
        }
        queue.trim("s", 2).await.unwrap();
        assert_eq!(queue.len("s").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replace_rewrites_body_under_new_id() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        let msg = message(tenant);
        let id = queue.publish("s", &msg).await.unwrap();

        let mut compressed = msg.clone();
        compressed.compressed = true;
        compressed.payload = vec![1, 2, 3];
        let new_id = queue.replace("s", &id, &compressed).await.unwrap();
        assert_ne!(id, new_id);

        let scanned = queue.scan("s", None, 10).await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert!(scanned[0].1.compressed);
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_publish() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .read("s", "g", "c1", 1, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish("s", &message(tenant)).await.unwrap();

        let delivered = reader.await.unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn scan_pages_from_the_tail() {
        let queue = MemoryQueue::new();
        let tenant = TenantId::new();
        for _ in 0..3 {
            queue.publish("s", &message(tenant)).await.unwrap();
        }
        let first_page = queue.scan("s", None, 2).await.unwrap();
        assert_eq!(first_page.len(), 2);
        let next = queue
            .scan("s", Some(first_page[1].0.clone()), 2)
            .await
            .unwrap();
        assert_eq!(next.len(), 1);
    }
}
