//! Assignment strategies.
//!
//! All strategies only consider agents whose capability set covers the
//! task's requirements; they differ in how they break the remaining tie.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::AgentInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentStrategy {
    RoundRobin,
    LeastLoaded,
    CapabilityMatch,
    /// Priority ordering applies at dequeue time (see the store); agent
    /// choice falls back to least-loaded.
    Priority,
}

impl AssignmentStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "round-robin" => Some(Self::RoundRobin),
            "least-loaded" => Some(Self::LeastLoaded),
            "capability-match" => Some(Self::CapabilityMatch),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }
}

/// Round-robin cursor, shared across assignments for one tenant.
#[derive(Debug, Default)]
pub struct RoundRobinCursor(AtomicUsize);

impl RoundRobinCursor {
    fn next(&self, len: usize) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) % len.max(1)
    }
}

/// Pick an agent for a task. Returns `None` when no available agent covers
/// the required capabilities.
#[must_use]
pub fn pick_agent<'a>(
    strategy: AssignmentStrategy,
    agents: &'a [AgentInfo],
    required_capabilities: &[String],
    cursor: &RoundRobinCursor,
) -> Option<&'a AgentInfo> {
    let eligible: Vec<&AgentInfo> = agents
        .iter()
        .filter(|agent| agent.covers(required_capabilities))
        .collect();
    if eligible.is_empty() {
        return None;
    }

    match strategy {
        AssignmentStrategy::RoundRobin => {
            let index = cursor.next(eligible.len());
            Some(eligible[index])
        },
        AssignmentStrategy::LeastLoaded | AssignmentStrategy::Priority => {
            least_loaded(&eligible)
        },
        AssignmentStrategy::CapabilityMatch => {
            // More-specific wins: the agent with the fewest capabilities
            // beyond what the task needs. Equal specificity falls through
            // to least-loaded.
            let best_surplus = eligible
                .iter()
                .map(|agent| surplus(agent, required_capabilities))
                .min()?;
            let most_specific: Vec<&AgentInfo> = eligible
                .into_iter()
                .filter(|agent| surplus(agent, required_capabilities) == best_surplus)
                .collect();
            least_loaded(&most_specific)
        },
    }
}

fn surplus(agent: &AgentInfo, required: &[String]) -> usize {
    agent
        .capabilities
        .iter()
        .filter(|c| !required.iter().any(|r| r == *c))
        .count()
}

fn least_loaded<'a>(eligible: &[&'a AgentInfo]) -> Option<&'a AgentInfo> {
    eligible
        .iter()
        .min_by(|a, b| {
            a.current_load
                .cmp(&b.current_load)
                // Ties broken by earliest last_seen.
                .then(a.last_seen.cmp(&b.last_seen))
        })
        .copied()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::AgentStatus,
        chrono::{Duration, Utc},
        relay_common::{AgentId, TenantId},
    };

    fn agent(capabilities: &[&str], load: u32, seen_secs_ago: i64) -> AgentInfo {
        AgentInfo {
            agent_id: AgentId::new(),
            tenant_id: TenantId::new(),
            capabilities: capabilities.iter().map(|s| (*s).to_string()).collect(),
            current_load: load,
            last_seen: Utc::now() - Duration::seconds(seen_secs_ago),
            status: AgentStatus::Available,
        }
    }

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn round_robin_cycles_through_eligible_agents() {
        let agents = vec![agent(&["code"], 0, 0), agent(&["code"], 0, 0)];
        let cursor = RoundRobinCursor::default();
        let first = pick_agent(AssignmentStrategy::RoundRobin, &agents, &[], &cursor).unwrap();
        let second = pick_agent(AssignmentStrategy::RoundRobin, &agents, &[], &cursor).unwrap();
        assert_ne!(first.agent_id, second.agent_id);
        let third = pick_agent(AssignmentStrategy::RoundRobin, &agents, &[], &cursor).unwrap();
        assert_eq!(first.agent_id, third.agent_id);
    }

    #[test]
    fn least_loaded_breaks_ties_by_earliest_last_seen() {
        let fresher = agent(&["code"], 1, 10);
        let older = agent(&["code"], 1, 500);
        let busy = agent(&["code"], 9, 0);
        let agents = vec![fresher.clone(), older.clone(), busy];
        let cursor = RoundRobinCursor::default();

        let picked = pick_agent(AssignmentStrategy::LeastLoaded, &agents, &[], &cursor).unwrap();
        assert_eq!(picked.agent_id, older.agent_id);
    }

    #[test]
    fn capability_match_prefers_most_specific() {
        let generalist = agent(&["code", "review", "deploy", "docs"], 0, 0);
        let specialist = agent(&["code", "review"], 5, 0);
        let agents = vec![generalist.clone(), specialist.clone()];
        let cursor = RoundRobinCursor::default();

        let picked = pick_agent(
            AssignmentStrategy::CapabilityMatch,
            &agents,
            &caps(&["code", "review"]),
            &cursor,
        )
        .unwrap();
        // The specialist wins despite higher load.
        assert_eq!(picked.agent_id, specialist.agent_id);
    }

    #[test]
    fn capability_match_equal_specificity_falls_through_to_load() {
        let a = agent(&["code", "extra"], 4, 0);
        let b = agent(&["code", "other"], 1, 0);
        let agents = vec![a, b.clone()];
        let cursor = RoundRobinCursor::default();

        let picked = pick_agent(
            AssignmentStrategy::CapabilityMatch,
            &agents,
            &caps(&["code"]),
            &cursor,
        )
        .unwrap();
        assert_eq!(picked.agent_id, b.agent_id);
    }

    #[test]
    fn unavailable_or_uncapable_agents_are_never_picked() {
        let mut offline = agent(&["code"], 0, 0);
        offline.status = AgentStatus::Offline;
        let wrong_caps = agent(&["docs"], 0, 0);
        let agents = vec![offline, wrong_caps];
        let cursor = RoundRobinCursor::default();

        assert!(
            pick_agent(
                AssignmentStrategy::LeastLoaded,
                &agents,
                &caps(&["code"]),
                &cursor
            )
            .is_none()
        );
    }
}
