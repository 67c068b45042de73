//! Tenant-scoped envelope encryption.

use {
    base64::Engine,
    secrecy::{ExposeSecret, SecretString},
    zeroize::Zeroizing,
};

use relay_common::TenantId;

use crate::{
    aes::Aes256GcmCipher,
    error::VaultError,
    kdf::{self, SALT_LEN},
    traits::Cipher,
};

/// Envelope-encrypts per-tenant secrets under keys derived from one master key.
///
/// Blob layout (before base64): `[version: 1][salt: 16][nonce ∥ ciphertext ∥ tag]`.
/// The salt is fresh per encryption, so even identical plaintexts for the same
/// tenant produce unrelated blobs. The tenant id is bound in as AAD — a blob
/// decrypted under any other tenant fails the auth tag.
pub struct TenantVault<C: Cipher = Aes256GcmCipher> {
    master_key: Zeroizing<[u8; 32]>,
    cipher: C,
}

impl TenantVault<Aes256GcmCipher> {
    /// Create a vault from a base64-encoded 32-byte master key.
    pub fn new(master_key_b64: &str) -> Result<Self, VaultError> {
        Self::with_cipher(master_key_b64, Aes256GcmCipher)
    }
}

impl<C: Cipher> TenantVault<C> {
    /// Create a vault with a custom cipher.
    pub fn with_cipher(master_key_b64: &str, cipher: C) -> Result<Self, VaultError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64.trim())
            .map_err(|e| VaultError::BadMasterKey(e.to_string()))?;
        let key: [u8; 32] = decoded
            .try_into()
            .map_err(|_| VaultError::BadMasterKey("master key must be 32 bytes".into()))?;
        Ok(Self {
            master_key: Zeroizing::new(key),
            cipher,
        })
    }

    /// Encrypt a plaintext for a tenant, returning a base64 blob.
    pub fn encrypt_for_tenant(
        &self,
        tenant_id: TenantId,
        plaintext: &SecretString,
    ) -> Result<String, VaultError> {
        let salt = kdf::generate_salt();
        let key = kdf::derive_tenant_key(&self.master_key, &salt, tenant_id)?;

        let sealed = self.cipher.encrypt(
            &key,
            plaintext.expose_secret().as_bytes(),
            tenant_id.as_uuid().as_bytes(),
        )?;

        let mut blob = Vec::with_capacity(1 + SALT_LEN + sealed.len());
        blob.push(self.cipher.version_tag());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&sealed);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a base64 blob for a tenant.
    ///
    /// Returns `VaultError::Integrity` for tampered blobs and blobs that
    /// belong to a different tenant.
    pub fn decrypt_for_tenant(
        &self,
        tenant_id: TenantId,
        blob_b64: &str,
    ) -> Result<SecretString, VaultError> {
        let blob = base64::engine::general_purpose::STANDARD.decode(blob_b64)?;
        if blob.len() < 1 + SALT_LEN {
            return Err(VaultError::Integrity);
        }

        let version = blob[0];
        if version != self.cipher.version_tag() {
            return Err(VaultError::UnsupportedVersion(version));
        }

        let salt = &blob[1..1 + SALT_LEN];
        let sealed = &blob[1 + SALT_LEN..];
        let key = kdf::derive_tenant_key(&self.master_key, salt, tenant_id)?;

        let plaintext = self
            .cipher
            .decrypt(&key, sealed, tenant_id.as_uuid().as_bytes())?;
        let text =
            Zeroizing::new(String::from_utf8(plaintext).map_err(|_| VaultError::Integrity)?);
        Ok(SecretString::new(text.as_str().to_owned()))
    }
}

/// Generate a fresh base64 master key (operator bootstrap helper).
#[must_use]
pub fn generate_master_key() -> String {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}
