//! Append-only cold archive for aged-out webhook events.
//!
//! Keys are `{tenant_id}/{date}/{event_id}`; files are gzip-compressed
//! event JSON. Existing keys are never overwritten.

use std::path::PathBuf;

use {
    flate2::{Compression, write::GzEncoder},
    std::io::Write,
};

use relay_common::{EventId, TenantId};

use crate::types::WebhookEvent;

/// Filesystem-backed archive. The object-store deployment swaps this for a
/// bucket client with the same key scheme.
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, tenant: TenantId, date: &str, event_id: EventId) -> PathBuf {
        self.root
            .join(tenant.to_string())
            .join(date)
            .join(format!("{event_id}.json.gz"))
    }

    /// Store an event. Append-only: an existing key is left untouched and
    /// reported as success (the archive already holds that event).
    pub async fn store(&self, event: &WebhookEvent) -> std::io::Result<String> {
        let date = event.received_at.format("%Y-%m-%d").to_string();
        let path = self.path_for(event.tenant_id, &date, event.event_id);
        let key = format!("{}/{}/{}", event.tenant_id, date, event.event_id);

        let body = serde_json::to_vec(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if path.exists() {
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(&path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&body)?;
            encoder.finish()?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

        Ok(key)
    }

    /// Read an archived event back (operator tooling, tests).
    pub async fn load(
        &self,
        tenant: TenantId,
        date: &str,
        event_id: EventId,
    ) -> std::io::Result<WebhookEvent> {
        let path = self.path_for(tenant, date, event_id);
        tokio::task::spawn_blocking(move || -> std::io::Result<WebhookEvent> {
            let file = std::fs::File::open(&path)?;
            let decoder = flate2::read::GzDecoder::new(file);
            serde_json::from_reader(decoder)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchive::new(dir.path());
        let event = WebhookEvent::new(
            TenantId::new(),
            "github",
            "push",
            "d1",
            br#"{"ref": "main"}"#.to_vec(),
        );

        let key = archive.store(&event).await.unwrap();
        assert!(key.starts_with(&event.tenant_id.to_string()));

        let date = event.received_at.format("%Y-%m-%d").to_string();
        let loaded = archive
            .load(event.tenant_id, &date, event.event_id)
            .await
            .unwrap();
        assert_eq!(loaded, event);
    }

    #[tokio::test]
    async fn second_store_of_same_event_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchive::new(dir.path());
        let event = WebhookEvent::new(TenantId::new(), "github", "push", "d1", b"{}".to_vec());

        archive.store(&event).await.unwrap();
        archive.store(&event).await.unwrap();

        let date = event.received_at.format("%Y-%m-%d").to_string();
        assert!(
            archive
                .load(event.tenant_id, &date, event.event_id)
                .await
                .is_ok()
        );
    }
}
