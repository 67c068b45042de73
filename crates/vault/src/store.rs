//! Credential persistence: ciphertext rows, webhook secrets, API keys.
//!
//! The store never returns plaintext except through
//! [`CredentialStore::decrypt_credential`], whose result is a `SecretString`
//! scoped to the caller. API keys are stored as SHA-256 hashes and verified
//! in constant time.

use {
    base64::Engine,
    rand::RngCore,
    secrecy::SecretString,
    sha2::{Digest, Sha256},
    sqlx::SqlitePool,
    subtle::ConstantTimeEq,
};

use relay_common::TenantId;

use crate::{error::VaultError, traits::Cipher, vault::TenantVault};

/// `credential_type` column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiKey,
    Oauth2,
    Basic,
    Custom,
}

impl CredentialType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Oauth2 => "oauth2",
            Self::Basic => "basic",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self, VaultError> {
        match s {
            "api_key" => Ok(Self::ApiKey),
            "oauth2" => Ok(Self::Oauth2),
            "basic" => Ok(Self::Basic),
            "custom" => Ok(Self::Custom),
            other => Err(VaultError::Cipher(format!(
                "unknown credential type: {other}"
            ))),
        }
    }
}

/// A credential row (ciphertext only).
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub provider_name: String,
    pub credential_name: String,
    pub credential_type: CredentialType,
    pub ciphertext: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An API key row (for listing — never exposes the full key).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub label: String,
    pub key_prefix: String,
    pub created_at: String,
}

/// Tenant credential store backed by SQLite, encrypting through a [`TenantVault`].
pub struct CredentialStore<C: Cipher = crate::aes::Aes256GcmCipher> {
    pool: SqlitePool,
    vault: TenantVault<C>,
}

impl<C: Cipher> CredentialStore<C> {
    /// Create the store and its tables.
    pub async fn new(pool: SqlitePool, vault: TenantVault<C>) -> Result<Self, VaultError> {
        let store = Self { pool, vault };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), VaultError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credentials (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id       TEXT NOT NULL,
                provider_name   TEXT NOT NULL,
                credential_name TEXT NOT NULL,
                credential_type TEXT NOT NULL,
                ciphertext      TEXT NOT NULL,
                expires_at      TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (tenant_id, provider_name, credential_name)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS webhook_secrets (
                tenant_id  TEXT NOT NULL,
                provider   TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (tenant_id, provider)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id  TEXT NOT NULL,
                label      TEXT NOT NULL,
                key_hash   BLOB NOT NULL,
                key_prefix TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Credentials ─────────────────────────────────────────────────────────

    /// Encrypt and store a credential. Returns the row id.
    pub async fn upsert_credential(
        &self,
        tenant_id: TenantId,
        provider_name: &str,
        credential_name: &str,
        credential_type: CredentialType,
        plaintext: &SecretString,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<i64, VaultError> {
        let ciphertext = self.vault.encrypt_for_tenant(tenant_id, plaintext)?;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO credentials
                (tenant_id, provider_name, credential_name, credential_type, ciphertext, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, provider_name, credential_name)
             DO UPDATE SET ciphertext = excluded.ciphertext,
                           credential_type = excluded.credential_type,
                           expires_at = excluded.expires_at,
                           updated_at = datetime('now')
             RETURNING id",
        )
        .bind(tenant_id.to_string())
        .bind(provider_name)
        .bind(credential_name)
        .bind(credential_type.as_str())
        .bind(&ciphertext)
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            provider = provider_name,
            credential = credential_name,
            "credential stored"
        );
        Ok(row.0)
    }

    /// Fetch a credential row by id, scoped to a tenant.
    pub async fn get_credential(
        &self,
        tenant_id: TenantId,
        id: i64,
    ) -> Result<CredentialRecord, VaultError> {
        let row: Option<(i64, String, String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT id, provider_name, credential_name, credential_type, ciphertext, expires_at
             FROM credentials WHERE id = ? AND tenant_id = ?",
        )
        .bind(id)
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let (id, provider_name, credential_name, credential_type, ciphertext, expires_at) =
            row.ok_or(VaultError::NotFound)?;

        Ok(CredentialRecord {
            id,
            tenant_id,
            provider_name,
            credential_name,
            credential_type: CredentialType::parse(&credential_type)?,
            ciphertext,
            expires_at: expires_at
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&chrono::Utc)),
        })
    }

    /// Decrypt a stored credential inside the caller's scope.
    pub fn decrypt_credential(
        &self,
        record: &CredentialRecord,
    ) -> Result<SecretString, VaultError> {
        self.vault
            .decrypt_for_tenant(record.tenant_id, &record.ciphertext)
    }

    /// Remove a credential (tool deletion or explicit revocation).
    pub async fn delete_credential(&self, tenant_id: TenantId, id: i64) -> Result<(), VaultError> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound);
        }
        Ok(())
    }

    // ── Webhook secrets ─────────────────────────────────────────────────────

    /// Store (or rotate) the HMAC secret for a tenant/provider pair.
    pub async fn set_webhook_secret(
        &self,
        tenant_id: TenantId,
        provider: &str,
        secret: &SecretString,
    ) -> Result<(), VaultError> {
        let ciphertext = self.vault.encrypt_for_tenant(tenant_id, secret)?;
        sqlx::query(
            "INSERT INTO webhook_secrets (tenant_id, provider, ciphertext)
             VALUES (?, ?, ?)
             ON CONFLICT (tenant_id, provider) DO UPDATE SET ciphertext = excluded.ciphertext",
        )
        .bind(tenant_id.to_string())
        .bind(provider)
        .bind(&ciphertext)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch and decrypt the HMAC secret for a tenant/provider pair.
    pub async fn webhook_secret(
        &self,
        tenant_id: TenantId,
        provider: &str,
    ) -> Result<SecretString, VaultError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT ciphertext FROM webhook_secrets WHERE tenant_id = ? AND provider = ?",
        )
        .bind(tenant_id.to_string())
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        let (ciphertext,) = row.ok_or(VaultError::NotFound)?;
        self.vault.decrypt_for_tenant(tenant_id, &ciphertext)
    }

    // ── API keys (gateway authentication) ───────────────────────────────────

    /// Create an API key for a tenant. Returns the plaintext key exactly once.
    pub async fn create_api_key(
        &self,
        tenant_id: TenantId,
        label: &str,
    ) -> Result<SecretString, VaultError> {
        let mut raw = [0u8; 32];
        rand::rng().fill_bytes(&mut raw);
        let key = format!(
            "rk_{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
        );
        let hash = Sha256::digest(key.as_bytes());
        let prefix: String = key.chars().take(11).collect();

        sqlx::query(
            "INSERT INTO api_keys (tenant_id, label, key_hash, key_prefix) VALUES (?, ?, ?, ?)",
        )
        .bind(tenant_id.to_string())
        .bind(label)
        .bind(hash.as_slice())
        .bind(&prefix)
        .execute(&self.pool)
        .await?;

        Ok(SecretString::new(key))
    }

    /// Verify an API key against the stored hashes in constant time.
    ///
    /// Returns the owning tenant on success.
    pub async fn verify_api_key(&self, presented: &str) -> Result<Option<TenantId>, VaultError> {
        let presented_hash = Sha256::digest(presented.as_bytes());
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT tenant_id, key_hash FROM api_keys")
                .fetch_all(&self.pool)
                .await?;

        // Scan all rows so timing doesn't reveal which (if any) key matched.
        let mut matched: Option<TenantId> = None;
        for (tenant, hash) in rows {
            if presented_hash.as_slice().ct_eq(&hash).into()
                && let Ok(tenant_id) = tenant.parse()
            {
                matched = Some(tenant_id);
            }
        }
        Ok(matched)
    }

    /// List a tenant's API keys (metadata only).
    pub async fn list_api_keys(&self, tenant_id: TenantId) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, label, key_prefix, created_at FROM api_keys WHERE tenant_id = ?
             ORDER BY id",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, label, key_prefix, created_at)| ApiKeyRecord {
                id,
                tenant_id,
                label,
                key_prefix,
                created_at,
            })
            .collect())
    }
}

/// A short stable fingerprint of a credential's ciphertext, used to key
/// permission-discovery coalescing without touching plaintext.
#[must_use]
pub fn credential_fingerprint(record: &CredentialRecord) -> String {
    let digest = Sha256::digest(record.ciphertext.as_bytes());
    hex::encode(&digest[..8])
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::vault::generate_master_key, secrecy::ExposeSecret};

    async fn test_store() -> CredentialStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let vault = TenantVault::new(&generate_master_key()).unwrap();
        CredentialStore::new(pool, vault).await.unwrap()
    }

    #[tokio::test]
    async fn credential_round_trip() {
        let store = test_store().await;
        let tenant = TenantId::new();
        let id = store
            .upsert_credential(
                tenant,
                "github",
                "ci-bot",
                CredentialType::ApiKey,
                &SecretString::new("ghp_abc123".into()),
                None,
            )
            .await
            .unwrap();

        let record = store.get_credential(tenant, id).await.unwrap();
        assert_eq!(record.provider_name, "github");
        assert_eq!(record.credential_type, CredentialType::ApiKey);

        let plain = store.decrypt_credential(&record).unwrap();
        assert_eq!(plain.expose_secret(), "ghp_abc123");
    }

    #[tokio::test]
    async fn rotation_replaces_ciphertext_in_place() {
        let store = test_store().await;
        let tenant = TenantId::new();
        let id1 = store
            .upsert_credential(
                tenant,
                "github",
                "ci-bot",
                CredentialType::ApiKey,
                &SecretString::new("old".into()),
                None,
            )
            .await
            .unwrap();
        let id2 = store
            .upsert_credential(
                tenant,
                "github",
                "ci-bot",
                CredentialType::ApiKey,
                &SecretString::new("new".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let record = store.get_credential(tenant, id2).await.unwrap();
        assert_eq!(
            store.decrypt_credential(&record).unwrap().expose_secret(),
            "new"
        );
    }

    #[tokio::test]
    async fn cross_tenant_read_is_not_found() {
        let store = test_store().await;
        let owner = TenantId::new();
        let id = store
            .upsert_credential(
                owner,
                "gitlab",
                "deploy",
                CredentialType::Oauth2,
                &SecretString::new("glpat".into()),
                None,
            )
            .await
            .unwrap();

        let intruder = TenantId::new();
        assert!(matches!(
            store.get_credential(intruder, id).await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn api_key_verifies_and_lists_prefix_only() {
        let store = test_store().await;
        let tenant = TenantId::new();
        let key = store.create_api_key(tenant, "ci").await.unwrap();

        let verified = store.verify_api_key(key.expose_secret()).await.unwrap();
        assert_eq!(verified, Some(tenant));

        let missing = store.verify_api_key("rk_not-a-real-key").await.unwrap();
        assert!(missing.is_none());

        let listed = store.list_api_keys(tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(key.expose_secret().starts_with(&listed[0].key_prefix));
        assert_ne!(listed[0].key_prefix, *key.expose_secret());
    }

    #[tokio::test]
    async fn webhook_secret_round_trip() {
        let store = test_store().await;
        let tenant = TenantId::new();
        store
            .set_webhook_secret(tenant, "github", &SecretString::new("whsec_1".into()))
            .await
            .unwrap();
        let secret = store.webhook_secret(tenant, "github").await.unwrap();
        assert_eq!(secret.expose_secret(), "whsec_1");

        assert!(matches!(
            store.webhook_secret(TenantId::new(), "github").await,
            Err(VaultError::NotFound)
        ));
    }
}
