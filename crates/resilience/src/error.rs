use std::time::Duration;

/// Backpressure-style rejections from the protection layer.
///
/// None of these are retried in place; the caller is told to slow down.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit open for {provider}; retry after {retry_after:?}")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },

    #[error("bulkhead queue full for {provider}")]
    BulkheadFull { provider: String },

    #[error("tenant rate limit exceeded; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl ResilienceError {
    /// Suggested client backoff, when one is known.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::RateLimited { retry_after } => {
                Some(*retry_after)
            },
            Self::BulkheadFull { .. } => None,
        }
    }
}
