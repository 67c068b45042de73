//! Organization-tool persistence.

use sqlx::SqlitePool;

use relay_common::{TenantId, ToolId};

/// `status` column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgToolStatus {
    Pending,
    Active,
    Suspended,
}

impl OrgToolStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Pending,
        }
    }
}

/// A tenant-scoped provider instance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrgToolRecord {
    pub id: ToolId,
    pub tenant_id: TenantId,
    pub provider_name: String,
    pub instance_name: String,
    /// Row id in the credential store.
    pub credential_ref: i64,
    pub config_overrides: serde_json::Value,
    pub status: OrgToolStatus,
    pub feature_flags: serde_json::Value,
}

/// SQLite-backed organization-tool store.
pub struct OrgToolStore {
    pool: SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum OrgToolError {
    #[error("tool not found")]
    NotFound,

    #[error("instance name already in use for this tenant")]
    DuplicateInstance,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrgToolStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, OrgToolError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS organization_tools (
                id               TEXT PRIMARY KEY,
                tenant_id        TEXT NOT NULL,
                provider_name    TEXT NOT NULL,
                instance_name    TEXT NOT NULL,
                credential_ref   INTEGER NOT NULL,
                config_overrides TEXT NOT NULL DEFAULT '{}',
                status           TEXT NOT NULL DEFAULT 'pending',
                feature_flags    TEXT NOT NULL DEFAULT '{}',
                created_at       TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at       TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (tenant_id, instance_name)
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn insert(&self, record: &OrgToolRecord) -> Result<(), OrgToolError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO organization_tools
                (id, tenant_id, provider_name, instance_name, credential_ref,
                 config_overrides, status, feature_flags)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.tenant_id.to_string())
        .bind(&record.provider_name)
        .bind(&record.instance_name)
        .bind(record.credential_ref)
        .bind(serde_json::to_string(&record.config_overrides)?)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.feature_flags)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrgToolError::DuplicateInstance);
        }
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId, id: ToolId) -> Result<OrgToolRecord, OrgToolError> {
        let row: Option<OrgToolRow> = sqlx::query_as(
            "SELECT id, tenant_id, provider_name, instance_name, credential_ref,
                    config_overrides, status, feature_flags
             FROM organization_tools WHERE id = ? AND tenant_id = ?",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(OrgToolError::NotFound)?.into_record()
    }

    /// Every tenant with at least one registered tool (consumer bootstrap).
    pub async fn tenants(&self) -> Result<Vec<TenantId>, OrgToolError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT tenant_id FROM organization_tools")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(tenant,)| tenant.parse().ok())
            .collect())
    }

    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<OrgToolRecord>, OrgToolError> {
        let rows: Vec<OrgToolRow> = sqlx::query_as(
            "SELECT id, tenant_id, provider_name, instance_name, credential_ref,
                    config_overrides, status, feature_flags
             FROM organization_tools WHERE tenant_id = ? ORDER BY instance_name",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrgToolRow::into_record).collect()
    }

    pub async fn set_status(
        &self,
        tenant_id: TenantId,
        id: ToolId,
        status: OrgToolStatus,
    ) -> Result<(), OrgToolError> {
        let result = sqlx::query(
            "UPDATE organization_tools SET status = ?, updated_at = datetime('now')
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(status.as_str())
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrgToolError::NotFound);
        }
        Ok(())
    }

    /// Swap the credential reference (rotation installs a new row id).
    pub async fn set_credential_ref(
        &self,
        tenant_id: TenantId,
        id: ToolId,
        credential_ref: i64,
    ) -> Result<(), OrgToolError> {
        let result = sqlx::query(
            "UPDATE organization_tools SET credential_ref = ?, updated_at = datetime('now')
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(credential_ref)
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrgToolError::NotFound);
        }
        Ok(())
    }

    /// Delete a tool. Returns its credential ref so the caller can destroy
    /// the credential too.
    pub async fn delete(&self, tenant_id: TenantId, id: ToolId) -> Result<i64, OrgToolError> {
        let record = self.get(tenant_id, id).await?;
        sqlx::query("DELETE FROM organization_tools WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(record.credential_ref)
    }
}

#[derive(sqlx::FromRow)]
struct OrgToolRow {
    id: String,
    tenant_id: String,
    provider_name: String,
    instance_name: String,
    credential_ref: i64,
    config_overrides: String,
    status: String,
    feature_flags: String,
}

impl OrgToolRow {
    fn into_record(self) -> Result<OrgToolRecord, OrgToolError> {
        Ok(OrgToolRecord {
            id: self.id.parse().map_err(|_| OrgToolError::NotFound)?,
            tenant_id: self.tenant_id.parse().map_err(|_| OrgToolError::NotFound)?,
            provider_name: self.provider_name,
            instance_name: self.instance_name,
            credential_ref: self.credential_ref,
            config_overrides: serde_json::from_str(&self.config_overrides)?,
            status: OrgToolStatus::parse(&self.status),
            feature_flags: serde_json::from_str(&self.feature_flags)?,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> OrgToolStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        OrgToolStore::new(pool).await.unwrap()
    }

    fn record(tenant: TenantId, instance: &str) -> OrgToolRecord {
        OrgToolRecord {
            id: ToolId::new(),
            tenant_id: tenant,
            provider_name: "github".into(),
            instance_name: instance.into(),
            credential_ref: 1,
            config_overrides: serde_json::json!({}),
            status: OrgToolStatus::Active,
            feature_flags: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn insert_get_list_delete() {
        let store = store().await;
        let tenant = TenantId::new();
        let rec = record(tenant, "main-github");
        store.insert(&rec).await.unwrap();

        let fetched = store.get(tenant, rec.id).await.unwrap();
        assert_eq!(fetched.instance_name, "main-github");
        assert_eq!(store.list(tenant).await.unwrap().len(), 1);

        let cred = store.delete(tenant, rec.id).await.unwrap();
        assert_eq!(cred, 1);
        assert!(matches!(
            store.get(tenant, rec.id).await,
            Err(OrgToolError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_instance_name_is_rejected_per_tenant() {
        let store = store().await;
        let tenant = TenantId::new();
        store.insert(&record(tenant, "gh")).await.unwrap();
        assert!(matches!(
            store.insert(&record(tenant, "gh")).await,
            Err(OrgToolError::DuplicateInstance)
        ));

        // A different tenant may reuse the name.
        store.insert(&record(TenantId::new(), "gh")).await.unwrap();
    }

    #[tokio::test]
    async fn cross_tenant_access_is_not_found() {
        let store = store().await;
        let owner = TenantId::new();
        let rec = record(owner, "gh");
        store.insert(&rec).await.unwrap();

        let intruder = TenantId::new();
        assert!(matches!(
            store.get(intruder, rec.id).await,
            Err(OrgToolError::NotFound)
        ));
        assert!(matches!(
            store.delete(intruder, rec.id).await,
            Err(OrgToolError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rotation_swaps_credential_ref() {
        let store = store().await;
        let tenant = TenantId::new();
        let rec = record(tenant, "gh");
        store.insert(&rec).await.unwrap();
        store.set_credential_ref(tenant, rec.id, 42).await.unwrap();
        assert_eq!(store.get(tenant, rec.id).await.unwrap().credential_ref, 42);
    }
}
