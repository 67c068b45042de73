//! Per-tenant envelope encryption and the credential store.
//!
//! Every tenant's credentials are encrypted with a tenant key derived from
//! the process master key and a per-blob salt. Plaintext exists only inside
//! the request scope that asked for it, wrapped in zeroizing containers.

pub mod aes;
pub mod error;
pub mod kdf;
pub mod store;
pub mod traits;
pub mod vault;

pub use {
    aes::Aes256GcmCipher,
    error::VaultError,
    store::{ApiKeyRecord, CredentialRecord, CredentialStore, CredentialType, credential_fingerprint},
    traits::Cipher,
    vault::TenantVault,
};
