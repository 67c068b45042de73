//! Redis Streams [`StreamQueue`] backend.
//!
//! Streams are `webhooks:{tenant}` with one consumer group per worker fleet.
//! Entries carry a single `data` field holding the JSON-encoded
//! [`QueueMessage`]. Delivery counts come from the pending entries list, so
//! reclaim and retry accounting survive process restarts.

use std::time::Duration;

use {async_trait::async_trait, redis::aio::ConnectionManager, tracing::debug};

use crate::{
    error::QueueError,
    traits::StreamQueue,
    types::{DeadLetter, Delivered, EntryId, PendingInfo, QueueMessage},
};

const DATA_FIELD: &str = "data";

/// Raw entry shape as decoded from stream replies: `(id, [field, value, ...])`.
type RawEntry = (String, Vec<Vec<u8>>);

pub struct RedisQueue {
    manager: ConnectionManager,
}

impl RedisQueue {
    /// Connect and return a queue backed by the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(QueueError::from)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    /// Idempotently create the consumer group (and the stream if missing).
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn decode_entry(raw: &RawEntry) -> Result<QueueMessage, QueueError> {
        // Fields arrive as a flat [name, value, name, value, ...] array.
        let mut chunks = raw.1.chunks_exact(2);
        let data = chunks
            .find(|pair| pair[0] == DATA_FIELD.as_bytes())
            .map(|pair| &pair[1])
            .ok_or_else(|| QueueError::Backend(format!("entry {} has no data field", raw.0)))?;
        Ok(serde_json::from_slice(data)?)
    }

    async fn xadd(&self, stream: &str, message: &QueueMessage) -> Result<EntryId, QueueError> {
        let mut conn = self.manager.clone();
        let body = serde_json::to_vec(message)?;
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    /// Fetch per-id delivery counts from the pending entries list.
    async fn delivery_counts(
        &self,
        stream: &str,
        group: &str,
        ids: &[String],
    ) -> Result<std::collections::HashMap<String, u32>, QueueError> {
        let mut counts = std::collections::HashMap::new();
        if ids.is_empty() {
            return Ok(counts);
        }
        let mut conn = self.manager.clone();
        for id in ids {
            let rows: Vec<(String, String, u64, u32)> = redis::cmd("XPENDING")
                .arg(stream)
                .arg(group)
                .arg(id)
                .arg(id)
                .arg(1)
                .query_async(&mut conn)
                .await?;
            if let Some((entry_id, _consumer, _idle, deliveries)) = rows.into_iter().next() {
                counts.insert(entry_id, deliveries);
            }
        }
        Ok(counts)
    }

    async fn read_with_cursor(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        cursor: &str,
    ) -> Result<Vec<RawEntry>, QueueError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(cursor);

        let reply: Option<Vec<(String, Vec<RawEntry>)>> = cmd.query_async(&mut conn).await?;
        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .collect())
    }
}

#[async_trait]
impl StreamQueue for RedisQueue {
    async fn publish(&self, stream: &str, message: &QueueMessage) -> Result<EntryId, QueueError> {
        self.xadd(stream, message).await
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivered>, QueueError> {
        self.ensure_group(stream, group).await?;

        // Pending-first: cursor "0" returns this consumer's unacked entries.
        let mut raw = self
            .read_with_cursor(stream, group, consumer, count, None, "0")
            .await?;
        if raw.len() < count {
            let block = if raw.is_empty() { Some(block) } else { None };
            let fresh = self
                .read_with_cursor(stream, group, consumer, count - raw.len(), block, ">")
                .await?;
            raw.extend(fresh);
        }

        let ids: Vec<String> = raw.iter().map(|(id, _)| id.clone()).collect();
        let counts = self.delivery_counts(stream, group, &ids).await?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let message = Self::decode_entry(entry)?;
            out.push(Delivered {
                id: entry.0.clone(),
                message,
                attempts: counts.get(&entry.0).copied().unwrap_or(1),
            });
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        if acked == 0 {
            return Err(QueueError::NotPending(id.to_string()));
        }
        Ok(())
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<PendingInfo>, QueueError> {
        let mut conn = self.manager.clone();
        let rows: Vec<(String, String, u64, u32)> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(1000)
            .query_async(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, consumer, idle_ms, deliveries)| PendingInfo {
                id,
                consumer,
                idle: Duration::from_millis(idle_ms),
                deliveries,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<Vec<Delivered>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(0u64);
        for id in ids {
            cmd.arg(id);
        }
        let raw: Vec<RawEntry> = cmd.query_async(&mut conn).await?;

        let claimed_ids: Vec<String> = raw.iter().map(|(id, _)| id.clone()).collect();
        let counts = self.delivery_counts(stream, group, &claimed_ids).await?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let message = Self::decode_entry(entry)?;
            out.push(Delivered {
                id: entry.0.clone(),
                message,
                attempts: counts.get(&entry.0).copied().unwrap_or(1),
            });
        }
        debug!(stream, consumer, claimed = out.len(), "claimed idle entries");
        Ok(out)
    }

    async fn dead_letter(
        &self,
        stream: &str,
        dlq: &str,
        group: &str,
        id: &str,
        letter: &DeadLetter,
    ) -> Result<(), QueueError> {
        let dlq_message = QueueMessage {
            event_id: letter.original.event_id,
            tenant_id: letter.original.tenant_id,
            payload: serde_json::to_vec(letter)?,
            first_enqueued_at: letter.original.first_enqueued_at,
            compressed: false,
        };
        self.xadd(dlq, &dlq_message).await?;

        // Ack-then-delete; a crash between the two leaves a harmless
        // already-dead-lettered entry that the next reclaim pass re-buries.
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self, stream: &str) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await?)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan(
        &self,
        stream: &str,
        start_exclusive: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<(EntryId, QueueMessage)>, QueueError> {
        let mut conn = self.manager.clone();
        let start = match &start_exclusive {
            Some(id) => format!("({id}"),
            None => "-".to_string(),
        };
        let raw: Vec<RawEntry> = redis::cmd("XRANGE")
            .arg(stream)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        raw.iter()
            .map(|entry| Ok((entry.0.clone(), Self::decode_entry(entry)?)))
            .collect()
    }

    async fn replace(
        &self,
        stream: &str,
        id: &str,
        message: &QueueMessage,
    ) -> Result<EntryId, QueueError> {
        let new_id = self.xadd(stream, message).await?;
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(new_id)
    }

    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XDEL");
        cmd.arg(stream);
        for id in ids {
            cmd.arg(id);
        }
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}
