//! Metric name and label definitions.
//!
//! Centralizing these keeps names consistent across crates and documents the
//! exported surface in one place. Every metric carries the `tenant` and
//! `component` labels.

/// Common label keys.
pub mod labels {
    pub const TENANT: &str = "tenant";
    pub const COMPONENT: &str = "component";
    pub const PROVIDER: &str = "provider";
    pub const METHOD: &str = "method";
    pub const OUTCOME: &str = "outcome";
}

/// Metric names.
pub mod names {
    /// Requests handled, any front door.
    pub const REQUESTS_TOTAL: &str = "relay_requests_total";
    /// Failed requests, by component.
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
    /// Webhook deliveries suppressed as duplicates.
    pub const DEDUP_HITS_TOTAL: &str = "relay_dedup_hits_total";
    /// Circuit breaker transitions (labelled with the new state).
    pub const BREAKER_STATE_CHANGES_TOTAL: &str = "relay_breaker_state_changes_total";
    /// End-to-end request duration in seconds.
    pub const REQUEST_DURATION_SECONDS: &str = "relay_request_duration_seconds";
    /// Ingress-to-enqueue latency for webhook deliveries.
    pub const WEBHOOK_ENQUEUE_LATENCY_SECONDS: &str = "relay_webhook_enqueue_latency_seconds";
    /// Time tasks spend waiting before assignment.
    pub const TASK_WAIT_SECONDS: &str = "relay_task_wait_seconds";
    /// Currently connected MCP sessions.
    pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
    /// Entries moved to a dead-letter stream.
    pub const DEAD_LETTERED_TOTAL: &str = "relay_dead_lettered_total";
}

/// Histogram bucket boundaries.
pub mod buckets {
    /// Request durations: sub-millisecond to 30s.
    pub const REQUEST_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];
    /// Enqueue latency: the ingress path budget is ~200ms p99.
    pub const ENQUEUE_LATENCY: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0];
    /// Task wait: seconds to minutes.
    pub const TASK_WAIT: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0];
}
