//! # Switchboard Routing Engine
//!
//! Admission control for inbound phone calls and multi-channel messages. For
//! every work item the engine decides whether an available, capable agent can
//! take it now, whether a bot can answer it, or whether it has to wait in a
//! queue.
//!
//! ## Features
//!
//! - **Queue Manager**: named priority queues with bounded length and timeouts
//! - **Load Balancer**: pluggable agent selection, failover, health checks and
//!   scaling advisories
//! - **Call Router**: direct assignment or queueing with priority decay on
//!   failed connections
//! - **Message Router**: bot answering with human handoff, channel-aware
//!   routing and bulk submission
//!
//! ## Architecture
//!
//! - [`queue`]: priority queues owned by each router
//! - [`agent`]: agents, the shared agent pool and capability matching
//! - [`balancer`]: agent selection and health monitoring
//! - [`routing`]: the call and message routers
//! - [`engine`]: facade wiring everything to one event bus
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchboard_routing_engine::prelude::*;
//!
//! let engine = RoutingEngine::new(RoutingConfig::default(), collaborators)?;
//! engine.start();
//! engine.update_agent_pool(vec![Agent::new("agent-1", "Alice", 3)]);
//!
//! let call = Call::inbound(Customer::new("cust-42"));
//! let call_id = call.id.clone();
//! engine.call_router().route(call).await?;
//! engine.call_router().complete_call(&call_id)?;
//! ```

pub mod agent;
pub mod balancer;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod routing;
pub mod work;

pub use config::RoutingConfig;
pub use engine::{Collaborators, EngineStats, RoutingEngine};
pub use error::{Result, RoutingError};
pub use events::RoutingEvent;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agent::{Agent, AgentId, AgentPool, AgentStatus, Requirements};
    pub use crate::balancer::{LoadBalancer, SelectionPolicy};
    pub use crate::capabilities::{BotReply, BotResponder, CallConnector, Intent, IntentDetector, MessageTransport};
    pub use crate::config::RoutingConfig;
    pub use crate::engine::{Collaborators, EngineStats, RoutingEngine};
    pub use crate::error::{FailureKind, Result, RoutingError};
    pub use crate::events::{RoutingEvent, ScalingDirection, ScalingSignal};
    pub use crate::queue::{QueueManager, QueueStats};
    pub use crate::routing::{Admission, CallRouter, MessageRouter, RouterStats};
    pub use crate::work::{Call, ChannelKind, Customer, Message, WorkItem, WorkItemId};
    pub use switchboard_infra_common::{EventBus, Subscriber};
}
