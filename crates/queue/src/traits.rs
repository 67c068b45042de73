//! The stream-queue contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::QueueError,
    types::{DeadLetter, Delivered, EntryId, PendingInfo, QueueMessage},
};

/// At-least-once stream queue with consumer groups.
///
/// Semantics all backends must provide:
/// - `publish` is an atomic append and assigns a monotonically increasing id.
/// - Within a group, each entry is delivered to exactly one consumer at a
///   time; it stays pending until acked or reclaimed.
/// - `read` is pending-first: a consumer re-reads its own unacked entries
///   before receiving new ones.
/// - `claim` transfers ownership of idle entries and increments delivery
///   counts.
#[async_trait]
pub trait StreamQueue: Send + Sync {
    /// Append an entry; returns the assigned id.
    async fn publish(&self, stream: &str, message: &QueueMessage) -> Result<EntryId, QueueError>;

    /// Read up to `count` entries for `consumer`, blocking up to `block` when
    /// nothing is immediately available. Own pending entries come first.
    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivered>, QueueError>;

    /// Remove an entry from the group's pending set.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError>;

    /// Entries idle for at least `min_idle`, claimable by any group member.
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<PendingInfo>, QueueError>;

    /// Transfer ownership of `ids` to `consumer`. Returns the redelivered
    /// entries (ids that vanished in the meantime are skipped).
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<Vec<Delivered>, QueueError>;

    /// Move an entry to the paired dead-letter stream and ack it.
    async fn dead_letter(
        &self,
        stream: &str,
        dlq: &str,
        group: &str,
        id: &str,
        letter: &DeadLetter,
    ) -> Result<(), QueueError>;

    /// Current stream length.
    async fn len(&self, stream: &str) -> Result<u64, QueueError>;

    /// Approximately bound the stream length, dropping the oldest entries.
    async fn trim(&self, stream: &str, max_len: u64) -> Result<(), QueueError>;

    /// Read raw entries from the tail end (oldest first), for the lifecycle
    /// maintainer. Does not touch group state.
    async fn scan(
        &self,
        stream: &str,
        start_exclusive: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<(EntryId, QueueMessage)>, QueueError>;

    /// Replace an entry's message body in place (delete + re-append under a
    /// fresh id). Used by the maintainer to compress warm entries.
    async fn replace(
        &self,
        stream: &str,
        id: &str,
        message: &QueueMessage,
    ) -> Result<EntryId, QueueError>;

    /// Delete entries outright (cold export has already archived them).
    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<(), QueueError>;
}
