/// Discovery failures.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// The introspection probe failed and fail-closed policy is active.
    #[error("permission discovery failed for tool {tool_id}: {message}")]
    DiscoveryFailed { tool_id: String, message: String },

    /// The provider rejected the credential outright.
    #[error("credential rejected by {provider}")]
    CredentialRejected { provider: String },
}
