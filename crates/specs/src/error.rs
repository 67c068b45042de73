/// Spec cache failures.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// Fetch failed after retries and no fallback exists.
    #[error("spec unavailable for {key}")]
    Unavailable { key: String },

    /// The document fetched for this key is not a usable OpenAPI spec.
    /// Fatal for the key: nothing is cached.
    #[error("spec parse error for {key}: {message}")]
    Parse { key: String, message: String },

    /// L2 store failure.
    #[error("spec store error: {0}")]
    Store(#[from] sqlx::Error),
}
