//! Vault error types.

/// Errors produced by vault and credential-store operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No master key was configured for this process.
    #[error("no master key configured")]
    MissingMasterKey,

    /// The master key failed to decode or has the wrong length.
    #[error("invalid master key: {0}")]
    BadMasterKey(String),

    /// Auth-tag mismatch, truncated blob, or a blob encrypted for another
    /// tenant. Deliberately carries no detail beyond the fact of failure.
    #[error("integrity failure: ciphertext rejected")]
    Integrity,

    /// The blob's version byte names a cipher this build doesn't know.
    #[error("unsupported cipher version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Encryption failed (never caused by attacker input).
    #[error("cipher error: {0}")]
    Cipher(String),

    /// The requested credential does not exist for this tenant.
    #[error("credential not found")]
    NotFound,

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
