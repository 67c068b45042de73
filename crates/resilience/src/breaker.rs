//! Rolling-window circuit breaker, one instance per `(provider, tenant)`.
//!
//! `closed → open` when the window holds at least `min_requests` outcomes and
//! the error ratio reaches `error_ratio`. `open → half-open` after a reset
//! timeout that doubles (capped) on repeated opens. `half-open → closed`
//! after `close_successes` consecutive successes; any half-open failure
//! re-opens immediately.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use {
    relay_common::TenantId,
    relay_metrics::{counter, labels, names},
};

use crate::error::ResilienceError;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub window: Duration,
    pub min_requests: u64,
    pub error_ratio: f64,
    pub reset_timeout: Duration,
    /// Cap for the exponential reset timeout under repeated opens.
    pub max_reset_timeout: Duration,
    pub close_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            min_requests: 10,
            error_ratio: 0.5,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(480),
            close_successes: 3,
        }
    }
}

/// Externally observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { successes: u32 },
}

#[derive(Debug)]
struct BreakerInner {
    phase: Phase,
    /// Recent outcomes: (when, was_error). Pruned to the window on access.
    outcomes: VecDeque<(Instant, bool)>,
    /// Consecutive opens, drives the exponential reset timeout.
    open_streak: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            phase: Phase::Closed,
            outcomes: VecDeque::new(),
            open_streak: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.duration_since(at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let errors = self.outcomes.iter().filter(|(_, e)| *e).count();
        errors as f64 / self.outcomes.len() as f64
    }

    fn reset_timeout(&self, config: &BreakerConfig) -> Duration {
        let exp = self.open_streak.saturating_sub(1).min(16);
        let scaled = config.reset_timeout.saturating_mul(1u32 << exp.min(4));
        scaled.min(config.max_reset_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BreakerKey {
    provider: String,
    tenant: TenantId,
}

/// All breakers for the process, keyed by `(provider, tenant)`.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<BreakerKey, Mutex<BreakerInner>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Gate a call. `Ok(())` admits it; the caller must report the outcome
    /// with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn check(&self, provider: &str, tenant: TenantId) -> Result<(), ResilienceError> {
        self.check_at(provider, tenant, Instant::now())
    }

    pub fn check_at(
        &self,
        provider: &str,
        tenant: TenantId,
        now: Instant,
    ) -> Result<(), ResilienceError> {
        let key = BreakerKey {
            provider: provider.to_string(),
            tenant,
        };
        let entry = self
            .breakers
            .entry(key)
            .or_insert_with(|| Mutex::new(BreakerInner::new()));
        let mut inner = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        match inner.phase {
            Phase::Closed | Phase::HalfOpen { .. } => Ok(()),
            Phase::Open { until } => {
                if now >= until {
                    inner.phase = Phase::HalfOpen { successes: 0 };
                    self.note_transition(provider, tenant, BreakerState::HalfOpen);
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen {
                        provider: provider.to_string(),
                        retry_after: until.duration_since(now),
                    })
                }
            },
        }
    }

    pub fn record_success(&self, provider: &str, tenant: TenantId) {
        self.record_at(provider, tenant, false, Instant::now());
    }

    pub fn record_failure(&self, provider: &str, tenant: TenantId) {
        self.record_at(provider, tenant, true, Instant::now());
    }

    pub fn record_at(&self, provider: &str, tenant: TenantId, was_error: bool, now: Instant) {
        let key = BreakerKey {
            provider: provider.to_string(),
            tenant,
        };
        let entry = self
            .breakers
            .entry(key)
            .or_insert_with(|| Mutex::new(BreakerInner::new()));
        let mut inner = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        inner.outcomes.push_back((now, was_error));
        inner.prune(now, self.config.window);

        match inner.phase {
            Phase::Closed => {
                if inner.outcomes.len() as u64 >= self.config.min_requests
                    && inner.error_ratio() >= self.config.error_ratio
                {
                    inner.open_streak += 1;
                    let timeout = inner.reset_timeout(&self.config);
                    inner.phase = Phase::Open {
                        until: now + timeout,
                    };
                    tracing::warn!(
                        provider,
                        tenant_id = %tenant,
                        reset_after_secs = timeout.as_secs(),
                        "circuit breaker opened"
                    );
                    self.note_transition(provider, tenant, BreakerState::Open);
                }
            },
            Phase::HalfOpen { successes } => {
                if was_error {
                    inner.open_streak += 1;
                    let timeout = inner.reset_timeout(&self.config);
                    inner.phase = Phase::Open {
                        until: now + timeout,
                    };
                    self.note_transition(provider, tenant, BreakerState::Open);
                } else {
                    let successes = successes + 1;
                    if successes >= self.config.close_successes {
                        inner.phase = Phase::Closed;
                        inner.open_streak = 0;
                        inner.outcomes.clear();
                        tracing::info!(provider, tenant_id = %tenant, "circuit breaker closed");
                        self.note_transition(provider, tenant, BreakerState::Closed);
                    } else {
                        inner.phase = Phase::HalfOpen { successes };
                    }
                }
            },
            Phase::Open { .. } => {
                // Late outcome from a call admitted before the open; ignored.
            },
        }
    }

    /// Current state, for health reporting.
    #[must_use]
    pub fn state(&self, provider: &str, tenant: TenantId) -> BreakerState {
        let key = BreakerKey {
            provider: provider.to_string(),
            tenant,
        };
        match self.breakers.get(&key) {
            None => BreakerState::Closed,
            Some(entry) => {
                let inner = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                match inner.phase {
                    Phase::Closed => BreakerState::Closed,
                    Phase::Open { .. } => BreakerState::Open,
                    Phase::HalfOpen { .. } => BreakerState::HalfOpen,
                }
            },
        }
    }

    fn note_transition(&self, provider: &str, tenant: TenantId, to: BreakerState) {
        counter!(
            names::BREAKER_STATE_CHANGES_TOTAL,
            labels::TENANT => tenant.to_string(),
            labels::COMPONENT => "resilience",
            labels::PROVIDER => provider.to_string(),
            "state" => to.as_str(),
        )
        .increment(1);
    }
}
