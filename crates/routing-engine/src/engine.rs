use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use switchboard_infra_common::{EventBus, Subscriber};
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{Agent, AgentId, AgentPool, PoolStats};
use crate::balancer::LoadBalancer;
use crate::capabilities::{BotResponder, CallConnector, IntentDetector, MessageTransport};
use crate::config::RoutingConfig;
use crate::error::Result;
use crate::events::RoutingEvent;
use crate::routing::{CallRouter, MessageRouter, RouterStats};

/// Boundary capabilities the engine is built with
#[derive(Clone)]
pub struct Collaborators {
    pub call_connector: Arc<dyn CallConnector>,
    pub message_transport: Arc<dyn MessageTransport>,
    pub intent_detector: Arc<dyn IntentDetector>,
    pub bot_responder: Arc<dyn BotResponder>,
}

/// Engine-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub calls: RouterStats,
    pub messages: RouterStats,
    pub agents: PoolStats,
}

/// Main routing engine
///
/// Owns the shared agent pool, the load balancer, the event bus and both
/// routers. Everything is built from explicit configuration and collaborators;
/// several engines can live in one process.
pub struct RoutingEngine {
    config: RoutingConfig,
    events: EventBus,
    pool: AgentPool,
    balancer: Arc<LoadBalancer>,
    calls: CallRouter,
    messages: MessageRouter,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RoutingEngine {
    /// Create a new routing engine with a fresh event bus
    pub fn new(config: RoutingConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_event_bus(config, collaborators, EventBus::new())
    }

    /// Create a routing engine publishing to an existing event bus
    pub fn with_event_bus(config: RoutingConfig, collaborators: Collaborators, events: EventBus) -> Result<Self> {
        config.validate()?;
        info!("🎯 Initializing routing engine ({} strategy)", strategy_name(&config));

        let pool = AgentPool::new();
        let balancer = Arc::new(LoadBalancer::new(&config, pool.clone(), events.clone()));

        let calls = CallRouter::new(
            &config,
            Arc::clone(&balancer),
            collaborators.call_connector,
            events.clone(),
        );
        let messages = MessageRouter::new(
            &config,
            Arc::clone(&balancer),
            collaborators.message_transport,
            collaborators.intent_detector,
            collaborators.bot_responder,
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            pool,
            balancer,
            calls,
            messages,
            monitor: Mutex::new(None),
        })
    }

    /// Start the load balancer monitor and the queue timeout sweepers
    pub fn start(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }
        *monitor = Some(self.balancer.spawn_monitor());
        self.calls.start();
        self.messages.start();
        info!("🚀 Routing engine started");
    }

    /// Stop every background task. Queued work stays queued.
    pub fn shutdown(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
        self.calls.shutdown();
        self.messages.shutdown();
        info!("🛑 Routing engine stopped");
    }

    /// Replace the agent roster and let queued work retry
    pub fn update_agent_pool(&self, agents: Vec<Agent>) {
        let diff = self.pool.replace(agents);
        self.balancer.observe_roster();

        self.events.publish(RoutingEvent::PoolUpdated {
            total: self.pool.len(),
            added: diff.added.len(),
            removed: diff.removed.len() + diff.retiring.len(),
        });

        self.calls.notify_pool_changed();
        self.messages.notify_pool_changed();
    }

    /// Liveness report from an agent
    pub fn record_heartbeat(&self, agent_id: &AgentId) {
        self.balancer.record_heartbeat(agent_id);
    }

    pub fn call_router(&self) -> &CallRouter {
        &self.calls
    }

    pub fn message_router(&self) -> &MessageRouter {
        &self.messages
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn agent_pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to routing notifications
    pub fn subscribe(&self) -> Subscriber<RoutingEvent> {
        self.events.subscribe::<RoutingEvent>()
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            calls: self.calls.stats(),
            messages: self.messages.stats(),
            agents: self.pool.stats(),
        }
    }
}

impl Drop for RoutingEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}

fn strategy_name(config: &RoutingConfig) -> &'static str {
    crate::balancer::policy_for(config.load_balancing.strategy).name()
}
