//! AES-256-GCM implementation of the [`Cipher`] trait.

use {
    aes_gcm::{
        Aes256Gcm, Nonce,
        aead::{Aead, KeyInit, Payload},
    },
    rand::RngCore,
};

use crate::{error::VaultError, traits::Cipher};

/// Version tag for the AES-256-GCM cipher.
pub const VERSION_TAG: u8 = 0x01;

/// Nonce size for AES-GCM (12 bytes).
const NONCE_LEN: usize = 12;

/// GCM authentication tag size.
const TAG_LEN: usize = 16;

/// AES-256-GCM AEAD cipher.
///
/// Encrypted blob layout: `[nonce: 12 bytes][ciphertext + GCM tag: N + 16 bytes]`.
pub struct Aes256GcmCipher;

impl Cipher for Aes256GcmCipher {
    fn version_tag(&self) -> u8 {
        VERSION_TAG
    }

    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::Cipher(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload {
                msg: plaintext,
                aad,
            })
            .map_err(|e| VaultError::Cipher(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Integrity);
        }

        let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::Cipher(e.to_string()))?;

        cipher
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|_| VaultError::Integrity)
    }
}
