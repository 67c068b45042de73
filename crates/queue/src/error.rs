/// Queue backend failures.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backend connectivity or command failure; usually transient.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// The entry is not pending for this consumer group.
    #[error("entry {0} is not pending")]
    NotPending(String),

    /// A message failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl QueueError {
    /// Whether the failure is worth retrying against the same backend.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
