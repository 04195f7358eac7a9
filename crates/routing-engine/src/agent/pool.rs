use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Agent, AgentId, AgentStatus};
use crate::error::{Result, RoutingError};

/// Shared view of every agent the engine can route to.
///
/// The pool is the single owner of agent load counters. Reservations and
/// releases happen under its write lock, so two routers sharing one pool can
/// never push an agent past `max_load`.
#[derive(Debug, Clone, Default)]
pub struct AgentPool {
    inner: Arc<RwLock<PoolState>>,
}

#[derive(Debug, Default)]
struct PoolState {
    agents: HashMap<AgentId, Agent>,
    /// Dropped from the roster while still holding work
    retired: HashSet<AgentId>,
}

/// Result of applying a new roster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: Vec<AgentId>,
    pub removed: Vec<AgentId>,
    /// Removed from the roster but kept offline until their work drains
    pub retiring: Vec<AgentId>,
}

/// Aggregate pool statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    pub total_load: u32,
    pub total_capacity: u32,
    /// total_load / total_capacity over agents that are not offline
    pub utilization: f64,
}

impl AgentPool {
    /// Create an empty agent pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool seeded with a roster
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let pool = Self::new();
        pool.replace(agents.into_iter().collect());
        pool
    }

    /// Atomically pick and reserve an agent.
    ///
    /// `filter` narrows the agents that have spare capacity, `choose` picks one
    /// of the survivors. The chosen agent's load is incremented before the lock
    /// is released and the updated agent is returned.
    pub fn reserve<F, C>(&self, filter: F, choose: C) -> Option<Agent>
    where
        F: Fn(&Agent) -> bool,
        C: FnOnce(&[&Agent]) -> Option<AgentId>,
    {
        let mut state = self.inner.write();

        let chosen = {
            let candidates: Vec<&Agent> = state
                .agents
                .values()
                .filter(|a| a.has_capacity() && filter(a))
                .collect();
            if candidates.is_empty() {
                return None;
            }
            choose(&candidates)?
        };

        let agent = state.agents.get_mut(&chosen)?;
        if !agent.has_capacity() {
            warn!("Selection returned agent {} without spare capacity", chosen);
            return None;
        }

        agent.current_load += 1;
        if agent.current_load >= agent.max_load {
            agent.status = AgentStatus::Busy;
        }
        debug!("Reserved agent {} (load {}/{})", agent.id, agent.current_load, agent.max_load);
        Some(agent.clone())
    }

    /// Give back one unit of load.
    ///
    /// A busy agent becomes available again; an offline agent stays offline.
    /// Retired agents leave the pool once their load reaches zero.
    pub fn release(&self, id: &AgentId) -> Option<Agent> {
        let mut guard = self.inner.write();
        let state = &mut *guard;

        let agent = match state.agents.get_mut(id) {
            Some(agent) => agent,
            None => {
                warn!("Release for unknown agent {}", id);
                return None;
            }
        };

        agent.current_load = agent.current_load.saturating_sub(1);
        if agent.status == AgentStatus::Busy && agent.current_load < agent.max_load {
            agent.status = AgentStatus::Available;
        }
        let snapshot = agent.clone();

        if snapshot.current_load == 0 && state.retired.remove(id) {
            state.agents.remove(id);
            info!("👋 Retired agent {} drained and left the pool", id);
        }

        Some(snapshot)
    }

    /// Replace the roster wholesale.
    ///
    /// Agents present in both keep the load this pool has been tracking, since
    /// the pool owns that counter. New agents start with the roster's load.
    /// Agents missing from the roster that still hold work are kept offline
    /// until they drain; the rest are dropped.
    pub fn replace(&self, roster: Vec<Agent>) -> RosterDiff {
        let mut guard = self.inner.write();
        let state = &mut *guard;
        let mut diff = RosterDiff::default();

        let incoming: HashSet<AgentId> = roster.iter().map(|a| a.id.clone()).collect();
        let mut next: HashMap<AgentId, Agent> = HashMap::with_capacity(roster.len());

        for mut agent in roster {
            match state.agents.get(&agent.id) {
                Some(existing) => {
                    agent.current_load = existing.current_load;
                    state.retired.remove(&agent.id);
                }
                None => diff.added.push(agent.id.clone()),
            }
            normalize_status(&mut agent);
            next.insert(agent.id.clone(), agent);
        }

        let previous = std::mem::take(&mut state.agents);
        for (id, mut agent) in previous {
            if incoming.contains(&id) {
                continue;
            }
            if agent.current_load > 0 {
                agent.status = AgentStatus::Offline;
                state.retired.insert(id.clone());
                diff.retiring.push(id.clone());
                next.insert(id, agent);
            } else {
                state.retired.remove(&id);
                diff.removed.push(id);
            }
        }

        state.agents = next;
        info!(
            "👥 Agent roster updated: {} agents ({} added, {} removed, {} retiring)",
            state.agents.len(),
            diff.added.len(),
            diff.removed.len(),
            diff.retiring.len()
        );
        diff
    }

    /// Force an agent's status
    pub fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut state = self.inner.write();
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RoutingError::not_found(format!("agent {}", id)))?;
        agent.status = status;
        if status != AgentStatus::Offline {
            normalize_status(agent);
        }
        Ok(())
    }

    pub fn get(&self, id: &AgentId) -> Option<Agent> {
        self.inner.read().agents.get(id).cloned()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.inner.read().agents.contains_key(id)
    }

    /// Copy of every agent, sorted by id
    pub fn snapshot(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.inner.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Whether any agent with spare capacity passes `filter`
    pub fn any<F>(&self, filter: F) -> bool
    where
        F: Fn(&Agent) -> bool,
    {
        self.inner
            .read()
            .agents
            .values()
            .any(|a| a.has_capacity() && filter(a))
    }

    pub fn len(&self) -> usize {
        self.inner.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.read();
        let mut stats = PoolStats {
            total: state.agents.len(),
            ..Default::default()
        };

        for agent in state.agents.values() {
            match agent.status {
                AgentStatus::Available => stats.available += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Offline => {
                    stats.offline += 1;
                    continue;
                }
            }
            stats.total_load += agent.current_load;
            stats.total_capacity += agent.max_load;
        }

        if stats.total_capacity > 0 {
            stats.utilization = f64::from(stats.total_load) / f64::from(stats.total_capacity);
        }
        stats
    }
}

/// Align an online agent's status with its load
fn normalize_status(agent: &mut Agent) {
    match agent.status {
        AgentStatus::Offline => {}
        _ if agent.current_load >= agent.max_load => agent.status = AgentStatus::Busy,
        _ => agent.status = AgentStatus::Available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn least_loaded(candidates: &[&Agent]) -> Option<AgentId> {
        candidates
            .iter()
            .min_by(|a, b| a.current_load.cmp(&b.current_load).then_with(|| a.id.cmp(&b.id)))
            .map(|a| a.id.clone())
    }

    #[test]
    fn test_reserve_marks_busy_at_capacity() {
        let pool = AgentPool::with_agents(vec![Agent::new("a1", "Alice", 1)]);

        let agent = pool.reserve(|_| true, least_loaded).expect("agent reserved");
        assert_eq!(agent.current_load, 1);
        assert_eq!(agent.status, AgentStatus::Busy);

        assert!(pool.reserve(|_| true, least_loaded).is_none());
    }

    #[test]
    fn test_release_restores_availability() {
        let pool = AgentPool::with_agents(vec![Agent::new("a1", "Alice", 1)]);
        let id = AgentId::from("a1");

        pool.reserve(|_| true, least_loaded);
        let agent = pool.release(&id).unwrap();

        assert_eq!(agent.current_load, 0);
        assert_eq!(agent.status, AgentStatus::Available);

        // Release never underflows
        assert_eq!(pool.release(&id).unwrap().current_load, 0);
    }

    #[test]
    fn test_release_keeps_offline_agents_offline() {
        let pool = AgentPool::with_agents(vec![Agent::new("a1", "Alice", 2)]);
        let id = AgentId::from("a1");

        pool.reserve(|_| true, least_loaded);
        pool.set_status(&id, AgentStatus::Offline).unwrap();

        assert_eq!(pool.release(&id).unwrap().status, AgentStatus::Offline);
    }

    #[test]
    fn test_replace_preserves_tracked_load() {
        let pool = AgentPool::with_agents(vec![Agent::new("a1", "Alice", 2)]);
        pool.reserve(|_| true, least_loaded);

        // External roster does not know about our reservation
        let diff = pool.replace(vec![
            Agent::new("a1", "Alice", 2).with_skills(["sales"]),
            Agent::new("a2", "Bob", 1),
        ]);

        assert_eq!(diff.added, vec![AgentId::from("a2")]);
        let alice = pool.get(&AgentId::from("a1")).unwrap();
        assert_eq!(alice.current_load, 1);
        assert!(alice.has_skill("sales"));
    }

    #[test]
    fn test_replace_retires_loaded_agents() {
        let pool = AgentPool::with_agents(vec![Agent::new("a1", "Alice", 2), Agent::new("a2", "Bob", 2)]);
        let a1 = AgentId::from("a1");
        pool.reserve(|a| a.id == a1, least_loaded);

        let diff = pool.replace(vec![]);
        assert_eq!(diff.retiring, vec![a1.clone()]);
        assert_eq!(diff.removed, vec![AgentId::from("a2")]);

        let retired = pool.get(&a1).unwrap();
        assert_eq!(retired.status, AgentStatus::Offline);
        assert!(!pool.any(|_| true));

        pool.release(&a1);
        assert!(!pool.contains(&a1));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_stats_ignore_offline_capacity() {
        let pool = AgentPool::with_agents(vec![
            Agent::new("a1", "Alice", 4),
            Agent::new("a2", "Bob", 4).with_status(AgentStatus::Offline),
        ]);
        pool.reserve(|_| true, least_loaded);

        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.total_load, 1);
        assert_eq!(stats.total_capacity, 4);
        assert!((stats.utilization - 0.25).abs() < f64::EPSILON);
    }
}
