use std::time::Duration;

/// Typed provider failures.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown operation {operation_id} on {provider}")]
    UnknownOperation {
        provider: String,
        operation_id: String,
    },

    #[error("missing required parameter: {0}")]
    MissingParam(String),

    /// The provider answered with a non-success status.
    #[error("{provider} returned {status}")]
    Http {
        provider: String,
        status: u16,
        retryable: bool,
        /// `Retry-After`, when the provider sent one (429/503).
        retry_after: Option<Duration>,
        body: String,
    },

    /// The request never produced a response (DNS, connect, timeout).
    #[error("transport error calling {provider}: {message}")]
    Transport {
        provider: String,
        message: String,
        timed_out: bool,
    },

    #[error("response from {provider} is not valid JSON: {message}")]
    BadResponse { provider: String, message: String },
}

impl ProviderError {
    /// Whether retrying the same call may help.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } => *retryable,
            Self::Transport { timed_out, .. } => !timed_out,
            _ => false,
        }
    }

    /// HTTP status, when the failure carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider-requested backoff (from 429/503 responses).
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
