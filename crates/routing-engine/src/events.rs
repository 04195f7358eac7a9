//! Routing notifications published on the event bus.
//!
//! Every state change of a work item, every failure and every load balancer
//! signal is published as a [`RoutingEvent`]. Publishing is advisory: routers
//! never wait for subscribers.

use serde::{Deserialize, Serialize};
use switchboard_infra_common::events::{Event, EventPriority, EventType};

use crate::agent::AgentId;
use crate::error::FailureKind;
use crate::work::{WorkItemId, WorkKind};

/// Direction of a scaling advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    Up,
    Down,
}

/// Advisory for an external autoscaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingSignal {
    pub direction: ScalingDirection,
    pub utilization: f64,
    pub available_agents: usize,
    pub total_agents: usize,
}

/// Notification emitted by the routing core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoutingEvent {
    Queued {
        item_id: WorkItemId,
        kind: WorkKind,
        queue: String,
        priority: u32,
        position: usize,
    },
    Routing {
        item_id: WorkItemId,
        kind: WorkKind,
        agent_id: AgentId,
    },
    Assigned {
        item_id: WorkItemId,
        kind: WorkKind,
        agent_id: AgentId,
        via_overflow: bool,
    },
    /// Re-enqueued after a failed assignment with decayed priority
    Requeued {
        item_id: WorkItemId,
        kind: WorkKind,
        queue: String,
        priority: u32,
    },
    Completed {
        item_id: WorkItemId,
        kind: WorkKind,
        agent_id: Option<AgentId>,
        duration_ms: Option<u64>,
    },
    /// Terminal failure
    Failed {
        item_id: WorkItemId,
        kind: WorkKind,
        failure: FailureKind,
        reason: String,
    },
    BotHandled {
        item_id: WorkItemId,
        intent: String,
        confidence: f64,
    },
    HandoffRequested {
        item_id: WorkItemId,
        reason: String,
        priority: u32,
    },
    /// Queue at its overflow threshold; backup agents tried
    Overflowed {
        item_id: WorkItemId,
        kind: WorkKind,
        queue: String,
        depth: usize,
    },
    AgentUnresponsive {
        agent_id: AgentId,
        reason: String,
    },
    AgentRecovered {
        agent_id: AgentId,
    },
    Scaling(ScalingSignal),
    ComponentError {
        component: String,
        message: String,
    },
    PoolUpdated {
        total: usize,
        added: usize,
        removed: usize,
    },
}

impl RoutingEvent {
    /// The work item this event concerns, if any
    pub fn item_id(&self) -> Option<&WorkItemId> {
        match self {
            RoutingEvent::Queued { item_id, .. }
            | RoutingEvent::Routing { item_id, .. }
            | RoutingEvent::Assigned { item_id, .. }
            | RoutingEvent::Requeued { item_id, .. }
            | RoutingEvent::Completed { item_id, .. }
            | RoutingEvent::Failed { item_id, .. }
            | RoutingEvent::BotHandled { item_id, .. }
            | RoutingEvent::HandoffRequested { item_id, .. }
            | RoutingEvent::Overflowed { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    /// Whether this is a completed or failed notification
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoutingEvent::Completed { .. } | RoutingEvent::Failed { .. })
    }
}

impl Event for RoutingEvent {
    fn event_type() -> EventType {
        "switchboard.routing"
    }

    fn priority(&self) -> EventPriority {
        match self {
            RoutingEvent::Failed { .. } | RoutingEvent::AgentUnresponsive { .. } => EventPriority::High,
            RoutingEvent::ComponentError { .. } => EventPriority::Critical,
            RoutingEvent::Scaling(_) | RoutingEvent::HandoffRequested { .. } => EventPriority::Normal,
            _ => EventPriority::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_tag() {
        let event = RoutingEvent::Failed {
            item_id: WorkItemId::from("call-1"),
            kind: WorkKind::Call,
            failure: FailureKind::Timeout,
            reason: "waited too long".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["failure"], "timeout");
        assert_eq!(json["kind"], "call");
        assert!(event.is_terminal());
        assert_eq!(event.priority(), EventPriority::High);
    }

    #[test]
    fn test_item_id_accessor() {
        let event = RoutingEvent::AgentRecovered {
            agent_id: AgentId::from("a1"),
        };
        assert!(event.item_id().is_none());
        assert!(!event.is_terminal());
    }
}
