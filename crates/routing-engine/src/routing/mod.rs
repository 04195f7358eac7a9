//! # Routers
//!
//! The call and message routers share one dispatch core: direct assignment
//! with update-then-reconcile around the boundary call, queueing with
//! overflow escalation, per-queue drain loops, and priority decay on failed
//! assignments. The message router adds the bot and human handoff branch in
//! front of it.

pub mod call_router;
pub(crate) mod dispatch;
pub mod message_router;

use std::time::Duration;

use crate::config::RoutingConfig;

pub use call_router::{call_requirements, CallRouter};
pub use dispatch::{Admission, RouterStats};
pub use message_router::{message_requirements, MessageRouter};

/// Queue for VIP customers
pub const VIP_QUEUE: &str = "vip";
/// Fallback queue
pub const GENERAL_QUEUE: &str = "general";
/// Queue for non-VIP calls outside business hours
pub const AFTER_HOURS_QUEUE: &str = "after_hours";

pub(crate) fn dispatch_settings(
    config: &RoutingConfig,
    component: &'static str,
    max_active: usize,
) -> dispatch::DispatchSettings {
    dispatch::DispatchSettings {
        component,
        max_active,
        priority_routing: config.routing.priority_routing,
        priority_floor: config.queues.priority_floor,
        priority_decrement: config.queues.priority_decrement,
        queue_defaults: config.default_queue_limits(),
        queue_overrides: config.queue_overrides(),
        drain_poll: Duration::from_millis(config.general.drain_poll_interval_ms),
        sweep_interval: Duration::from_millis(config.general.timeout_sweep_interval_ms),
        overflow: config.overflow.clone(),
    }
}
