//! Shared gateway runtime state.
//!
//! Built once by the bootstrapper and passed into every handler — no
//! ambient globals. Initialized at boot, drained at shutdown.

use std::{sync::Arc, time::Duration};

use {dashmap::DashMap, sqlx::SqlitePool, tokio_util::sync::CancellationToken, tracing::info};

use {
    relay_common::TenantId,
    relay_config::RelayConfig,
    relay_metrics::MetricsHandle,
    relay_permissions::{DiscoveryOptions, PermissionDiscoverer, ScopeProbe},
    relay_providers::{ProviderExecutor, ProviderRegistry},
    relay_queue::{MemoryQueue, RedisQueue, StreamQueue},
    relay_resilience::{
        BreakerConfig, BreakerRegistry, BulkheadConfig, BulkheadRegistry, RateLimitConfig,
        RateLimiter,
    },
    relay_sessions::SessionRegistry,
    relay_specs::{FetchOptions, SpecCache, SpecCacheOptions},
    relay_tasks::{AssignmentStrategy, EngineOptions, TaskEngine, TaskStore},
    relay_tools::{AuditStore, OrgToolStore, ToolGuards},
    relay_vault::{CredentialStore, TenantVault},
    relay_webhooks::{
        DedupFilter, FsArchive, LifecycleMaintainer, LifecycleOptions, WebhookIngress,
        WorkerOptions, WorkerPool,
    },
};

use crate::handler::TaskMaterializer;

/// Everything the request handlers need, shared behind one `Arc`.
pub struct AppState {
    pub config: RelayConfig,
    pub sessions: Arc<SessionRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub executor: Arc<ProviderExecutor>,
    pub specs: Arc<SpecCache>,
    pub discoverer: Arc<PermissionDiscoverer>,
    pub guards: Arc<ToolGuards>,
    pub audit: Arc<AuditStore>,
    pub org_tools: Arc<OrgToolStore>,
    pub credentials: Arc<CredentialStore>,
    pub tasks: Arc<TaskEngine>,
    pub queue: Arc<dyn StreamQueue>,
    pub ingress: Arc<WebhookIngress<dyn StreamQueue>>,
    pub workers: Arc<WorkerPool<dyn StreamQueue>>,
    pub metrics: MetricsHandle,
    /// Root shutdown signal; children derive from it.
    pub shutdown: CancellationToken,
    /// Tenants with running consumer loops (and lifecycle coverage).
    active_tenants: DashMap<TenantId, ()>,
}

impl AppState {
    /// Wire the whole core from configuration.
    pub async fn build(
        config: RelayConfig,
        metrics: MetricsHandle,
    ) -> anyhow::Result<Arc<Self>> {
        let pool = SqlitePool::connect(&config.database.url).await?;

        let master_key = config
            .vault
            .master_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vault.master_key is required"))?;
        let vault = TenantVault::new(&master_key)?;
        let credentials = Arc::new(CredentialStore::new(pool.clone(), vault).await?);

        let queue: Arc<dyn StreamQueue> = match config.queue.backend {
            relay_config::QueueBackend::Memory => Arc::new(MemoryQueue::new()),
            relay_config::QueueBackend::Redis => {
                let url = config
                    .queue
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("queue.redis_url is required"))?;
                Arc::new(RedisQueue::connect(url).await?)
            },
        };

        let providers = Arc::new(ProviderRegistry::builtin());
        let executor = Arc::new(ProviderExecutor::new());
        let specs = Arc::new(
            SpecCache::new(pool.clone(), SpecCacheOptions {
                l1_ttl: Duration::from_secs(config.specs.l1_ttl_secs),
                l1_capacity: config.specs.l1_capacity,
                fetch: FetchOptions {
                    timeout: Duration::from_secs(config.specs.fetch_timeout_secs),
                    retries: config.specs.fetch_retries,
                },
            })
            .await?,
        );

        let discoverer = Arc::new(PermissionDiscoverer::new(
            ScopeProbe::new(Duration::from_secs(config.permissions.probe_timeout_secs)),
            DiscoveryOptions {
                ttl: Duration::from_secs(config.permissions.ttl_secs),
                jitter_pct: config.permissions.jitter_pct,
                fail_closed: config.permissions.fail_closed,
            },
        ));

        let guards = Arc::new(ToolGuards {
            breakers: BreakerRegistry::new(BreakerConfig {
                window: Duration::from_secs(config.resilience.breaker_window_secs),
                min_requests: config.resilience.breaker_min_requests,
                error_ratio: config.resilience.breaker_error_ratio,
                reset_timeout: Duration::from_secs(config.resilience.breaker_reset_secs),
                max_reset_timeout: Duration::from_secs(config.resilience.breaker_reset_secs * 16),
                close_successes: config.resilience.breaker_close_successes,
            }),
            bulkheads: BulkheadRegistry::new(BulkheadConfig {
                workers: config.resilience.bulkhead_workers,
                queue: config.resilience.bulkhead_queue,
            }),
            limiter: RateLimiter::new(RateLimitConfig {
                burst: config.resilience.rate_limit_burst,
                per_sec: config.resilience.rate_limit_per_sec,
                overrides: config.resilience.rate_overrides.clone(),
            }),
        });

        let audit = Arc::new(AuditStore::new(pool.clone()).await?);
        let org_tools = Arc::new(OrgToolStore::new(pool.clone()).await?);

        let tasks = Arc::new(TaskEngine::new(
            TaskStore::new(pool.clone()).await?,
            EngineOptions {
                max_delegations: config.tasks.max_delegations,
                default_strategy: AssignmentStrategy::parse(&config.tasks.default_strategy)
                    .unwrap_or(AssignmentStrategy::LeastLoaded),
                idempotency_ttl: Duration::from_secs(config.tasks.idempotency_ttl_secs),
                escalation_timeout: Duration::from_secs(config.tasks.escalation_timeout_secs),
            },
        ));

        let dedup_overrides = config
            .webhooks
            .dedup_overrides
            .iter()
            .map(|(provider, secs)| (provider.clone(), Duration::from_secs(*secs)))
            .collect();
        let ingress = Arc::new(WebhookIngress::new(
            Arc::clone(&queue),
            DedupFilter::new(
                Duration::from_secs(config.webhooks.dedup_window_secs),
                dedup_overrides,
            ),
            config.webhooks.max_payload_bytes,
            config.webhooks.high_water_mark,
        ));

        let sessions = Arc::new(SessionRegistry::new());
        let materializer = Arc::new(TaskMaterializer::new(
            Arc::clone(&tasks),
            Arc::clone(&sessions),
        ));
        let workers = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            materializer,
            WorkerOptions {
                group: config.queue.consumer_group.clone(),
                visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
                max_attempts: config.queue.max_attempts,
                read_count: 16,
                block: Duration::from_secs(2),
            },
        ));

        Ok(Arc::new(Self {
            config,
            sessions,
            providers,
            executor,
            specs,
            discoverer,
            guards,
            audit,
            org_tools,
            credentials,
            tasks,
            queue,
            ingress,
            workers,
            metrics,
            shutdown: CancellationToken::new(),
            active_tenants: DashMap::new(),
        }))
    }

    /// Start consumer loops for a tenant if none are running yet.
    ///
    /// Called on the first webhook for a tenant and at boot for every tenant
    /// with registered tools.
    pub fn ensure_consumers(self: &Arc<Self>, tenant: TenantId) {
        if self.active_tenants.insert(tenant, ()).is_some() {
            return;
        }
        info!(tenant_id = %tenant, consumers = self.config.queue.consumers, "starting consumers");
        for i in 0..self.config.queue.consumers {
            let state = Arc::clone(self);
            let cancel = self.shutdown.child_token();
            let consumer = format!("consumer-{i}");
            tokio::spawn(async move {
                state.workers.run_consumer(tenant, &consumer, cancel).await;
            });
        }
    }

    /// Tenants currently under consumption / lifecycle maintenance.
    #[must_use]
    pub fn active_tenants(&self) -> Vec<TenantId> {
        self.active_tenants.iter().map(|e| *e.key()).collect()
    }

    /// Spawn the background maintainers (lifecycle, escalation).
    pub fn spawn_maintainers(self: &Arc<Self>, archive: Arc<FsArchive>) {
        let maintainer = LifecycleMaintainer::new(
            Arc::clone(&self.queue),
            archive,
            LifecycleOptions {
                hot_ttl: Duration::from_secs(self.config.webhooks.hot_ttl_secs),
                warm_ttl: Duration::from_secs(self.config.webhooks.warm_ttl_secs),
                max_stream_len: self.config.queue.max_stream_len,
                interval: Duration::from_secs(self.config.webhooks.maintenance_interval_secs),
                scan_batch: 512,
            },
        );
        let state = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            maintainer
                .run(move || state.active_tenants(), cancel)
                .await;
        });

        if self.config.tasks.escalation_timeout_secs > 0 {
            let state = Arc::clone(self);
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            match state.tasks.escalate_stalled().await {
                                Ok(escalated) => {
                                    for task in escalated {
                                        crate::handler::notify_task_update(
                                            &state.sessions,
                                            &task,
                                            "escalated",
                                        )
                                        .await;
                                    }
                                },
                                Err(e) => {
                                    tracing::warn!(error = %e, "escalation pass failed");
                                },
                            }
                        }
                    }
                }
            });
        }
    }
}
