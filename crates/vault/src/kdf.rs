//! HKDF-SHA256 key derivation: master key + per-blob salt → tenant key.

use {hkdf::Hkdf, rand::RngCore, sha2::Sha256, zeroize::Zeroizing};

use {crate::error::VaultError, relay_common::TenantId};

/// Domain-separation string mixed into every derived key.
const KDF_INFO_PREFIX: &[u8] = b"relay-tenant-dek-v1:";

/// Salt length embedded in each encrypted blob.
pub const SALT_LEN: usize = 16;

/// Derive a tenant's 256-bit data key.
///
/// The tenant id participates in the `info` parameter, so two tenants never
/// share a key even for an identical salt.
pub fn derive_tenant_key(
    master_key: &[u8; 32],
    salt: &[u8],
    tenant_id: TenantId,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), master_key);

    let mut info = Vec::with_capacity(KDF_INFO_PREFIX.len() + 16);
    info.extend_from_slice(KDF_INFO_PREFIX);
    info.extend_from_slice(tenant_id.as_uuid().as_bytes());

    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(&info, okm.as_mut())
        .map_err(|e| VaultError::Cipher(format!("KDF expand failed: {e}")))?;
    Ok(okm)
}

/// Generate a random salt for a new blob.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let master = [9u8; 32];
        let salt = [1u8; SALT_LEN];
        let tenant = TenantId::new();
        let a = derive_tenant_key(&master, &salt, tenant).unwrap();
        let b = derive_tenant_key(&master, &salt, tenant).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_tenants_get_different_keys() {
        let master = [9u8; 32];
        let salt = [1u8; SALT_LEN];
        let a = derive_tenant_key(&master, &salt, TenantId::new()).unwrap();
        let b = derive_tenant_key(&master, &salt, TenantId::new()).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn different_salts_get_different_keys() {
        let master = [9u8; 32];
        let tenant = TenantId::new();
        let a = derive_tenant_key(&master, &[1u8; SALT_LEN], tenant).unwrap();
        let b = derive_tenant_key(&master, &[2u8; SALT_LEN], tenant).unwrap();
        assert_ne!(*a, *b);
    }
}
