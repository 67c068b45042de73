use {
    relay_common::ErrorClass, relay_providers::ProviderError, relay_resilience::ResilienceError,
};

/// Tool execution failures, mapped to JSON-RPC errors by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The name does not resolve to an exposed tool. Operations outside the
    /// permission set surface identically to names that never existed.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Backpressure(#[from] ResilienceError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("request cancelled")]
    Cancelled,
}

impl ToolError {
    /// Where this failure sits in the shared taxonomy. Drives the
    /// `retryable` hint surfaced to MCP clients.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownTool(_) => ErrorClass::Authorization,
            Self::InvalidArgs(_) => ErrorClass::Validation,
            Self::Backpressure(_) => ErrorClass::Backpressure,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Provider(e) => match e {
                ProviderError::Transport { timed_out: true, .. } => ErrorClass::Timeout,
                _ => ErrorClass::Dependency {
                    transient: e.retryable(),
                },
            },
        }
    }
}
