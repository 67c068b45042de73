//! The two-tier cache itself: moka L1 with jittered TTL, SQLite L2.

use std::{sync::Arc, time::Duration};

use {
    moka::{Expiry, future::Cache},
    rand::Rng,
    sqlx::SqlitePool,
    tracing::{info, warn},
};

use crate::{
    embedded::embedded_spec,
    error::SpecError,
    fetch::{FetchOptions, fetch_spec},
    types::ParsedSpec,
};

#[derive(Debug, Clone)]
pub struct SpecCacheOptions {
    pub l1_ttl: Duration,
    pub l1_capacity: u64,
    pub fetch: FetchOptions,
}

impl Default for SpecCacheOptions {
    fn default() -> Self {
        Self {
            l1_ttl: Duration::from_secs(86_400),
            l1_capacity: 256,
            fetch: FetchOptions::default(),
        }
    }
}

/// Per-entry expiry: the configured TTL ±10%, so a fleet of processes does
/// not refetch every spec in the same instant.
struct JitteredTtl {
    base: Duration,
}

impl Expiry<String, Arc<ParsedSpec>> for JitteredTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        _value: &Arc<ParsedSpec>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        let base_ms = self.base.as_millis() as u64;
        let spread = base_ms / 10;
        let jitter = rand::rng().random_range(0..=spread * 2);
        Some(Duration::from_millis(base_ms - spread + jitter))
    }
}

/// Two-tier spec cache.
pub struct SpecCache {
    l1: Cache<String, Arc<ParsedSpec>>,
    pool: SqlitePool,
    client: reqwest::Client,
    options: SpecCacheOptions,
}

impl SpecCache {
    /// Create the cache and its L2 table.
    pub async fn new(pool: SqlitePool, options: SpecCacheOptions) -> Result<Self, SpecError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS spec_cache (
                spec_key   TEXT NOT NULL,
                version    TEXT NOT NULL,
                document   TEXT NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (spec_key, version)
            )",
        )
        .execute(&pool)
        .await?;

        let l1 = Cache::builder()
            .max_capacity(options.l1_capacity)
            .expire_after(JitteredTtl { base: options.l1_ttl })
            .build();

        Ok(Self {
            l1,
            pool,
            client: reqwest::Client::new(),
            options,
        })
    }

    /// Get a parsed spec, trying L1, then L2, then the network, then the
    /// embedded fallback.
    pub async fn get(&self, key: &str, url: &str) -> Result<Arc<ParsedSpec>, SpecError> {
        if let Some(spec) = self.l1.get(key).await {
            return Ok(spec);
        }

        if let Some(spec) = self.load_l2(key).await? {
            let spec = Arc::new(spec);
            self.l1.insert(key.to_string(), Arc::clone(&spec)).await;
            return Ok(spec);
        }

        match fetch_spec(&self.client, key, url, &self.options.fetch).await {
            Ok(document) => {
                // Parse before caching anything: a bad document is fatal for
                // the key and must not poison either tier.
                let spec = ParsedSpec::parse(key, &document)?;
                self.store_l2(&spec, &document).await?;
                let spec = Arc::new(spec);
                self.l1.insert(key.to_string(), Arc::clone(&spec)).await;
                info!(key, version = %spec.version, "spec fetched and cached");
                Ok(spec)
            },
            Err(fetch_err) => {
                let Some(document) = embedded_spec(key) else {
                    return Err(fetch_err);
                };
                warn!(key, "spec fetch failed; serving embedded fallback");
                let spec = Arc::new(ParsedSpec::parse(key, document)?);
                self.l1.insert(key.to_string(), Arc::clone(&spec)).await;
                Ok(spec)
            },
        }
    }

    /// Drop a key from L1 (used by tests and by operators after an upstream
    /// spec rollback).
    pub async fn invalidate(&self, key: &str) {
        self.l1.invalidate(key).await;
    }

    async fn load_l2(&self, key: &str) -> Result<Option<ParsedSpec>, SpecError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT document FROM spec_cache WHERE spec_key = ?
             ORDER BY fetched_at DESC LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some((document,)) => Ok(Some(ParsedSpec::parse(key, &document)?)),
        }
    }

    async fn store_l2(&self, spec: &ParsedSpec, document: &str) -> Result<(), SpecError> {
        sqlx::query(
            "INSERT INTO spec_cache (spec_key, version, document)
             VALUES (?, ?, ?)
             ON CONFLICT (spec_key, version)
             DO UPDATE SET document = excluded.document, fetched_at = datetime('now')",
        )
        .bind(&spec.key)
        .bind(&spec.version)
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
