use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::agent::AgentId;

/// Liveness bookkeeping for one agent
#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub last_seen: Instant,
    /// Set once the agent reports its first heartbeat; only monitored agents
    /// are subject to missed-check suspension
    pub monitored: bool,
    pub missed_checks: u32,
    pub consecutive_failures: u32,
    /// Taken offline by the balancer rather than by the roster
    pub suspended: bool,
}

impl AgentHealth {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            monitored: false,
            missed_checks: 0,
            consecutive_failures: 0,
            suspended: false,
        }
    }
}

/// Why an agent was suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    MissedHealthChecks(u32),
    AssignmentFailures(u32),
}

impl std::fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuspendReason::MissedHealthChecks(n) => write!(f, "missed {} health checks", n),
            SuspendReason::AssignmentFailures(n) => write!(f, "{} consecutive assignment failures", n),
        }
    }
}

/// Per-agent health records
#[derive(Debug)]
pub(crate) struct HealthTracker {
    records: DashMap<AgentId, AgentHealth>,
    heartbeat_timeout: Duration,
    failure_threshold: u32,
}

impl HealthTracker {
    pub(crate) fn new(heartbeat_timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            records: DashMap::new(),
            heartbeat_timeout,
            failure_threshold,
        }
    }

    pub(crate) fn get(&self, id: &AgentId) -> Option<AgentHealth> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Sync records with the roster. Every listed agent counts as seen; the
    /// roster is authoritative, so a listed agent is no longer suspended.
    pub(crate) fn observe<'a>(&self, roster: impl IntoIterator<Item = &'a AgentId>, now: Instant) {
        let mut present = std::collections::HashSet::new();
        for id in roster {
            present.insert(id.clone());
            let mut record = self.records.entry(id.clone()).or_insert_with(|| AgentHealth::new(now));
            record.last_seen = now;
            record.missed_checks = 0;
            record.suspended = false;
        }
        self.records.retain(|id, _| present.contains(id));
    }

    /// Returns true if the agent had been suspended
    pub(crate) fn heartbeat(&self, id: &AgentId, now: Instant) -> bool {
        let mut record = self.records.entry(id.clone()).or_insert_with(|| AgentHealth::new(now));
        let was_suspended = record.suspended;
        record.last_seen = now;
        record.monitored = true;
        record.missed_checks = 0;
        record.consecutive_failures = 0;
        record.suspended = false;
        was_suspended
    }

    pub(crate) fn success(&self, id: &AgentId, now: Instant) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.consecutive_failures = 0;
            record.last_seen = now;
        }
    }

    /// Count a failure; returns the reason when this failure suspends the agent
    pub(crate) fn failure(&self, id: &AgentId, max_failures: u32, now: Instant) -> Option<SuspendReason> {
        let mut record = self.records.entry(id.clone()).or_insert_with(|| AgentHealth::new(now));
        record.consecutive_failures += 1;
        debug!("Agent {} has {} consecutive failures", id, record.consecutive_failures);

        if !record.suspended && record.consecutive_failures >= max_failures {
            record.suspended = true;
            return Some(SuspendReason::AssignmentFailures(record.consecutive_failures));
        }
        None
    }

    /// One health check round; returns newly suspended agents
    pub(crate) fn check(&self, now: Instant) -> Vec<(AgentId, SuspendReason)> {
        let mut suspended = Vec::new();

        for mut record in self.records.iter_mut() {
            if !record.monitored || record.suspended {
                continue;
            }
            if now.saturating_duration_since(record.last_seen) > self.heartbeat_timeout {
                record.missed_checks += 1;
                if record.missed_checks >= self.failure_threshold {
                    record.suspended = true;
                    suspended.push((
                        record.key().clone(),
                        SuspendReason::MissedHealthChecks(record.missed_checks),
                    ));
                }
            } else {
                record.missed_checks = 0;
            }
        }

        suspended
    }
}
