//! # Load Balancer
//!
//! Picks one agent out of the capable candidates, tracks agent health, and
//! reports scaling advisories. The balancer never adds or removes agents; it
//! may only take an agent offline when failover or health checks say so.

mod health;
pub mod policy;
mod scaling;

use std::sync::Arc;
use std::time::{Duration, Instant};

use switchboard_infra_common::EventBus;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentId, AgentPool, AgentStatus};
use crate::config::{FailoverConfig, LoadBalancingConfig, RoutingConfig};
use crate::error::{Result, RoutingError};
use crate::events::{RoutingEvent, ScalingSignal};

pub use health::{AgentHealth, SuspendReason};
pub use policy::{policy_for, LeastBusy, RoundRobin, SelectionPolicy, WeightedCapacity};

use health::HealthTracker;
use scaling::ScalingMonitor;

/// Agent selection, failover and health monitoring over a shared pool
#[derive(Debug)]
pub struct LoadBalancer {
    policy: Arc<dyn SelectionPolicy>,
    pool: AgentPool,
    config: LoadBalancingConfig,
    failover: FailoverConfig,
    health: HealthTracker,
    scaling: ScalingMonitor,
    events: EventBus,
}

impl LoadBalancer {
    /// Create a load balancer using the configured strategy
    pub fn new(config: &RoutingConfig, pool: AgentPool, events: EventBus) -> Self {
        let lb = config.load_balancing.clone();
        let balancer = Self {
            policy: policy_for(lb.strategy),
            pool,
            health: HealthTracker::new(Duration::from_millis(lb.heartbeat_timeout_ms), lb.failure_threshold),
            scaling: ScalingMonitor::new(lb.scale_up_threshold, lb.scale_down_threshold),
            failover: config.failover.clone(),
            config: lb,
            events,
        };
        balancer.observe_roster();
        balancer
    }

    /// Replace the selection policy
    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// Pick one candidate. Candidates at capacity or not available are ignored.
    ///
    /// Fails with `NoSuitableAgent` when nothing is left to pick from or the
    /// policy declines every remaining candidate.
    pub fn select(&self, candidates: &[&Agent]) -> Result<AgentId> {
        let eligible: Vec<&Agent> = candidates.iter().copied().filter(|a| a.has_capacity()).collect();
        if eligible.is_empty() {
            return Err(RoutingError::no_suitable_agent(format!(
                "none of {} candidates has spare capacity",
                candidates.len()
            )));
        }
        match self.policy.select(&eligible) {
            Some(agent) => Ok(agent.id.clone()),
            None => Err(RoutingError::no_suitable_agent(format!(
                "policy {} declined all {} eligible candidates",
                self.policy.name(),
                eligible.len()
            ))),
        }
    }

    /// Select and reserve an agent passing `filter` in one pool critical section
    pub fn reserve<F>(&self, filter: F) -> Result<Agent>
    where
        F: Fn(&Agent) -> bool,
    {
        let mut declined = None;
        let reserved = self.pool.reserve(filter, |candidates| {
            self.select(candidates).map_err(|e| declined = Some(e)).ok()
        });
        reserved.ok_or_else(|| {
            declined.unwrap_or_else(|| RoutingError::no_suitable_agent("no capable agent with spare capacity"))
        })
    }

    pub fn record_success(&self, agent_id: &AgentId) {
        self.health.success(agent_id, Instant::now());
    }

    /// Count an assignment failure against `agent_id`.
    ///
    /// Returns true when this failure took the agent offline.
    pub fn record_failure(&self, agent_id: &AgentId) -> bool {
        if !self.failover.enabled {
            return false;
        }
        match self.health.failure(agent_id, self.failover.max_failures, Instant::now()) {
            Some(reason) => {
                self.suspend(agent_id, reason);
                true
            }
            None => false,
        }
    }

    /// Liveness report from an agent; revives agents the balancer suspended
    pub fn record_heartbeat(&self, agent_id: &AgentId) {
        if !self.pool.contains(agent_id) {
            debug!("Heartbeat from unknown agent {}", agent_id);
            return;
        }
        if self.health.heartbeat(agent_id, Instant::now()) {
            match self.pool.set_status(agent_id, AgentStatus::Available) {
                Ok(()) => {
                    info!("💚 Agent {} recovered", agent_id);
                    self.events.publish(RoutingEvent::AgentRecovered {
                        agent_id: agent_id.clone(),
                    });
                }
                Err(e) => warn!("Could not revive agent {}: {}", agent_id, e),
            }
        }
    }

    /// Re-sync health records with the pool after a roster change
    pub fn observe_roster(&self) {
        let ids: Vec<AgentId> = self.pool.snapshot().into_iter().map(|a| a.id).collect();
        self.health.observe(ids.iter(), Instant::now());
    }

    pub fn health(&self, agent_id: &AgentId) -> Option<AgentHealth> {
        self.health.get(agent_id)
    }

    /// Run one health check round against `now`; returns suspended agents
    pub fn check_health(&self, now: Instant) -> Vec<AgentId> {
        self.health
            .check(now)
            .into_iter()
            .map(|(agent_id, reason)| {
                self.suspend(&agent_id, reason);
                agent_id
            })
            .collect()
    }

    /// Evaluate current utilization; publishes and returns a signal on a
    /// threshold crossing
    pub fn evaluate_scaling(&self) -> Option<ScalingSignal> {
        let signal = self.scaling.evaluate(&self.pool.stats())?;
        self.events.publish(RoutingEvent::Scaling(signal.clone()));
        Some(signal)
    }

    /// Spawn the periodic health check and scaling evaluation
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let balancer = Arc::clone(self);
        let period = Duration::from_millis(self.config.health_check_interval_ms);

        tokio::spawn(async move {
            info!("👁️ Starting load balancer monitor (every {:?})", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let suspended = balancer.check_health(Instant::now());
                if !suspended.is_empty() {
                    debug!("Health check suspended {} agents", suspended.len());
                }
                balancer.evaluate_scaling();
            }
        })
    }

    fn suspend(&self, agent_id: &AgentId, reason: SuspendReason) {
        warn!("🚨 Agent {} unresponsive ({}), taking offline", agent_id, reason);
        if let Err(e) = self.pool.set_status(agent_id, AgentStatus::Offline) {
            debug!("Suspended agent {} no longer in pool: {}", agent_id, e);
            return;
        }
        self.events.publish(RoutingEvent::AgentUnresponsive {
            agent_id: agent_id.clone(),
            reason: reason.to_string(),
        });
    }
}
