//! A single WebSocket session.

use std::{collections::HashMap, time::Instant};

use {tokio::sync::mpsc, tokio_util::sync::CancellationToken};

use {
    relay_common::{AgentId, SessionId, TenantId},
    relay_protocol::{ClientCapabilities, ClientInfo, LogLevel},
    relay_tasks::AgentInfo,
};

/// Protocol lifecycle phase.
///
/// `Connected` accepts only `initialize`; `Initializing` is the gap between
/// the `initialize` response and the client's `initialized` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Initializing,
    Initialized,
    ShuttingDown,
    Closed,
}

/// Per-connection session state.
pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub client_info: Option<ClientInfo>,
    pub client_capabilities: Option<ClientCapabilities>,
    pub protocol_version: Option<String>,
    pub phase: SessionPhase,
    /// Outbound frame channel to this session's write loop. Bounded: a slow
    /// client eventually blocks its own read loop.
    pub sender: mpsc::Sender<String>,
    pub log_level: LogLevel,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Cancel handles for in-flight requests, keyed by the JSON-RPC id's
    /// canonical string form.
    pending_requests: HashMap<String, CancellationToken>,
    /// Agents registered in this session, exclusively owned by it.
    agents: HashMap<AgentId, AgentInfo>,
}

impl Session {
    #[must_use]
    pub fn new(tenant_id: TenantId, sender: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            session_id: SessionId::new(),
            tenant_id,
            client_info: None,
            client_capabilities: None,
            protocol_version: None,
            phase: SessionPhase::Connected,
            sender,
            log_level: LogLevel::Info,
            created_at: now,
            last_activity: now,
            pending_requests: HashMap::new(),
            agents: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Register a cancel handle for an inbound request id.
    ///
    /// Notifications (no id) are non-cancellable and never registered.
    pub fn register_request(&mut self, request_id: &serde_json::Value) -> CancellationToken {
        let token = CancellationToken::new();
        self.pending_requests
            .insert(canonical_id(request_id), token.clone());
        token
    }

    /// Drop the handle once the response has been sent.
    pub fn complete_request(&mut self, request_id: &serde_json::Value) {
        self.pending_requests.remove(&canonical_id(request_id));
    }

    /// Signal cancellation. Returns false when the id is unknown (already
    /// completed or never seen) — per protocol, that is not an error.
    pub fn cancel_request(&mut self, request_id: &serde_json::Value) -> bool {
        match self.pending_requests.get(&canonical_id(request_id)) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Cancel everything in flight (connection closing or shutdown drain
    /// elapsed).
    pub fn cancel_all(&mut self) {
        for token in self.pending_requests.values() {
            token.cancel();
        }
        self.pending_requests.clear();
    }

    // ── Agents ──────────────────────────────────────────────────────────────

    pub fn register_agent(&mut self, agent: AgentInfo) {
        self.agents.insert(agent.agent_id, agent);
    }

    pub fn remove_agent(&mut self, agent_id: AgentId) -> Option<AgentInfo> {
        self.agents.remove(&agent_id)
    }

    pub fn agent_mut(&mut self, agent_id: AgentId) -> Option<&mut AgentInfo> {
        self.agents.get_mut(&agent_id)
    }

    #[must_use]
    pub fn agents(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.values()
    }

    /// Send a serialized frame to this session's write loop.
    pub async fn send(&self, frame: String) -> bool {
        self.sender.send(frame).await.is_ok()
    }

    /// Non-blocking send for broadcast paths; drops the frame when the
    /// channel is full rather than stalling the broadcaster.
    pub fn try_send(&self, frame: String) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

/// Canonical string form of a JSON-RPC id (numbers and strings both occur).
fn canonical_id(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let (tx, _rx) = mpsc::channel(relay_protocol::WRITE_CHANNEL_CAPACITY);
        Session::new(TenantId::new(), tx)
    }

    #[test]
    fn cancel_signals_registered_handle() {
        let mut session = session();
        let id = serde_json::json!(42);
        let token = session.register_request(&id);
        assert!(!token.is_cancelled());

        assert!(session.cancel_request(&id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_of_unknown_id_is_a_no_op() {
        let mut session = session();
        assert!(!session.cancel_request(&serde_json::json!(7)));
    }

    #[test]
    fn completed_requests_are_no_longer_cancellable() {
        let mut session = session();
        let id = serde_json::json!("req-1");
        let token = session.register_request(&id);
        session.complete_request(&id);
        assert!(!session.cancel_request(&id));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn numeric_and_string_ids_do_not_collide() {
        let mut session = session();
        let numeric = session.register_request(&serde_json::json!(1));
        let string = session.register_request(&serde_json::json!("1"));
        session.cancel_request(&serde_json::json!(1));
        assert!(numeric.is_cancelled());
        assert!(!string.is_cancelled());
    }

    #[test]
    fn cancel_all_sweeps_everything() {
        let mut session = session();
        let a = session.register_request(&serde_json::json!(1));
        let b = session.register_request(&serde_json::json!(2));
        session.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(session.pending_count(), 0);
    }
}
