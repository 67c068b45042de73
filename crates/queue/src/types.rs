//! Queue message and delivery types.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use relay_common::{EventId, TenantId};

/// Stream-assigned monotonic entry id, `{millis}-{seq}` like Redis Streams.
pub type EntryId = String;

/// The envelope that lands in a stream.
///
/// The payload is opaque to the queue. The lifecycle maintainer may rewrite
/// an entry with `compressed = true` and a deflated payload; consumers
/// inflate before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub payload: Vec<u8>,
    pub first_enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub compressed: bool,
}

impl QueueMessage {
    #[must_use]
    pub fn new(event_id: EventId, tenant_id: TenantId, payload: Vec<u8>) -> Self {
        Self {
            event_id,
            tenant_id,
            payload,
            first_enqueued_at: Utc::now(),
            compressed: false,
        }
    }
}

/// A message delivered to a consumer, with its delivery count.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub id: EntryId,
    pub message: QueueMessage,
    /// Times this entry has been delivered to any consumer (1 on first read).
    pub attempts: u32,
}

/// Pending-entry summary for reclaim decisions.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub id: EntryId,
    pub consumer: String,
    pub idle: std::time::Duration,
    pub deliveries: u32,
}

/// Reason an entry was moved to the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DeadLetterReason {
    /// The handler classified the failure as non-retryable.
    Fatal(String),
    /// Delivery attempts reached the configured maximum.
    AttemptsExhausted { attempts: u32 },
    /// The payload could not be decoded at all.
    Undecodable(String),
}

/// What lands on the DLQ: original message plus failure metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original: QueueMessage,
    pub reason: DeadLetterReason,
    pub failed_at: DateTime<Utc>,
}
