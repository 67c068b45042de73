use relay_queue::QueueError;

/// Ingress-path failures, mapped onto HTTP statuses by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Signature missing or mismatched → 401.
    #[error("webhook signature verification failed")]
    BadSignature,

    /// No webhook secret is registered for this tenant/provider → 401.
    #[error("no webhook secret configured for tenant")]
    NoSecret,

    /// Per-tenant stream is over its high-water mark → 429.
    #[error("tenant stream over high-water mark")]
    Backpressure,

    /// Body exceeds the configured cap → 413.
    #[error("payload too large: {size} > {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Queue(#[from] QueueError),
}
