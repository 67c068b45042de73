//! At-least-once stream queue with consumer groups.
//!
//! The contract is [`StreamQueue`]: atomic append with monotonic ids,
//! pending-first group reads, explicit acks, reclaim of idle entries, and a
//! parallel dead-letter stream. Two backends implement it: Redis Streams for
//! deployments and an in-memory queue for tests and single-node runs.

pub mod error;
pub mod memory;
pub mod redis_streams;
pub mod traits;
pub mod types;

pub use {
    error::QueueError,
    memory::MemoryQueue,
    redis_streams::RedisQueue,
    traits::StreamQueue,
    types::{DeadLetter, DeadLetterReason, Delivered, EntryId, PendingInfo, QueueMessage},
};

/// Stream name for a tenant's webhook events.
#[must_use]
pub fn webhook_stream(tenant: relay_common::TenantId) -> String {
    format!("webhooks:{tenant}")
}

/// Dead-letter stream paired with [`webhook_stream`].
#[must_use]
pub fn dlq_stream(tenant: relay_common::TenantId) -> String {
    format!("webhooks:{tenant}:dlq")
}
