//! The sharded session table.
//!
//! Partitioned by session-id hash so a busy gateway doesn't serialize every
//! connection event through one lock.

use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
};

use tokio::sync::RwLock;

use {
    relay_common::{SessionId, TenantId},
    relay_tasks::AgentInfo,
};

use crate::session::Session;

const SHARDS: usize = 16;

/// All live sessions for the process.
pub struct SessionRegistry {
    shards: Vec<RwLock<HashMap<SessionId, Session>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, session_id: SessionId) -> &RwLock<HashMap<SessionId, Session>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub async fn insert(&self, session: Session) -> SessionId {
        let session_id = session.session_id;
        self.shard(session_id)
            .write()
            .await
            .insert(session_id, session);
        session_id
    }

    pub async fn remove(&self, session_id: SessionId) -> Option<Session> {
        self.shard(session_id).write().await.remove(&session_id)
    }

    /// Run a closure against one session under its shard's write lock.
    ///
    /// Returns `None` when the session is gone. The closure must not block:
    /// no I/O is performed while holding a shard lock.
    pub async fn with_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        let shard = self.shard(session_id);
        let mut guard = shard.write().await;
        guard.get_mut(&session_id).map(f)
    }

    /// Every available agent belonging to a tenant, across sessions.
    pub async fn agents_for_tenant(&self, tenant_id: TenantId) -> Vec<AgentInfo> {
        let mut agents = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().await;
            for session in guard.values() {
                if session.tenant_id == tenant_id {
                    agents.extend(session.agents().cloned());
                }
            }
        }
        agents
    }

    /// Session ids for a tenant (notification fan-out).
    pub async fn sessions_for_tenant(&self, tenant_id: TenantId) -> Vec<SessionId> {
        let mut ids = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().await;
            ids.extend(
                guard
                    .values()
                    .filter(|s| s.tenant_id == tenant_id)
                    .map(|s| s.session_id),
            );
        }
        ids
    }

    /// Broadcast a frame to every initialized session of a tenant.
    ///
    /// Uses non-blocking sends; sessions with a full write channel miss the
    /// notification rather than stalling the broadcast.
    pub async fn notify_tenant(&self, tenant_id: TenantId, frame: &str) -> usize {
        let mut delivered = 0;
        for shard in &self.shards {
            let guard = shard.read().await;
            for session in guard.values() {
                if session.tenant_id == tenant_id
                    && session.phase == crate::session::SessionPhase::Initialized
                    && session.try_send(frame.to_string())
                {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub async fn count(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }
}
