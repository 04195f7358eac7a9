use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchboard_infra_common::EventBus;
use tracing::info;

use super::dispatch::{Admission, DispatchCore, Handover, RouterStats};
use super::{dispatch_settings, AFTER_HOURS_QUEUE, GENERAL_QUEUE, VIP_QUEUE};
use crate::agent::{Agent, Requirements};
use crate::balancer::LoadBalancer;
use crate::capabilities::CallConnector;
use crate::config::{RoutingConfig, RoutingRulesConfig};
use crate::error::{Result, RoutingError};
use crate::queue::QueueStats;
use crate::work::{Call, WorkItemId};

struct CallHandover {
    connector: Arc<dyn CallConnector>,
    rules: RoutingRulesConfig,
}

#[async_trait]
impl Handover<Call> for CallHandover {
    fn requirements(&self, call: &Call) -> Requirements {
        call_requirements(&self.rules, call)
    }

    async fn hand_over(&self, call: &Call, agent: &Agent) -> anyhow::Result<()> {
        self.connector.connect(call, agent).await
    }
}

/// Capability filter for a call
pub fn call_requirements(rules: &RoutingRulesConfig, call: &Call) -> Requirements {
    let mut reqs = Requirements::new();

    if call.customer.vip {
        reqs = reqs.with_vip_skill(rules.vip_skill.clone());
    }

    if rules.language_based_routing {
        if let Some(language) = &call.customer.language {
            reqs = reqs.with_language(language.clone());
        }
    }

    if rules.skill_based_routing {
        reqs = reqs.with_skills(call.derived_skills());
    }

    reqs
}

/// Phone call admission: direct assignment or queueing, with continuous
/// queue draining
#[derive(Clone)]
pub struct CallRouter {
    core: Arc<DispatchCore<Call>>,
    rules: RoutingRulesConfig,
}

impl CallRouter {
    /// Create a new call router
    pub fn new(
        config: &RoutingConfig,
        balancer: Arc<LoadBalancer>,
        connector: Arc<dyn CallConnector>,
        events: EventBus,
    ) -> Self {
        let handover = Arc::new(CallHandover {
            connector,
            rules: config.routing.clone(),
        });
        let settings = dispatch_settings(config, "call_router", config.general.max_concurrent_calls);

        Self {
            core: Arc::new(DispatchCore::new(settings, balancer, handover, events)),
            rules: config.routing.clone(),
        }
    }

    /// Route an inbound call: assign it to a capable agent now or queue it
    pub async fn route(&self, call: Call) -> Result<Admission> {
        if self.core.active_item(&call.id).is_some() || self.core.is_queued(&call.id) {
            return Err(RoutingError::AlreadyQueued(call.id.to_string()));
        }

        let queue = self.queue_name_at(&call, Utc::now());
        info!(
            "📞 Routing call {} (priority: {}, vip: {}, queue: {})",
            call.id, call.priority, call.customer.vip, queue
        );
        self.core.admit(call, &queue).await
    }

    /// Queue a call would wait in if no agent could take it at `now`
    pub fn queue_name_at(&self, call: &Call, now: DateTime<Utc>) -> String {
        if call.customer.vip {
            return VIP_QUEUE.to_string();
        }

        if self.rules.time_based_routing && !self.rules.business_hours.contains(now) {
            return AFTER_HOURS_QUEUE.to_string();
        }

        if self.rules.department_routing {
            if let Some(department) = call.department() {
                return department.to_string();
            }
        }

        GENERAL_QUEUE.to_string()
    }

    /// Finish an active call: release its agent and record the duration.
    ///
    /// Fails with `NotFound` when the call is not in the active table.
    pub fn complete_call(&self, call_id: &WorkItemId) -> Result<Call> {
        self.core.complete(call_id)
    }

    pub fn active_call(&self, call_id: &WorkItemId) -> Option<Call> {
        self.core.active_item(call_id)
    }

    pub fn active_calls(&self) -> Vec<Call> {
        self.core.active_items()
    }

    pub fn queued_call(&self, call_id: &WorkItemId) -> Option<Call> {
        self.core.queued_item(call_id)
    }

    pub fn is_queued(&self, call_id: &WorkItemId) -> bool {
        self.core.is_queued(call_id)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.core.queue_len(queue)
    }

    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.core.queue_stats()
    }

    pub fn stats(&self) -> RouterStats {
        self.core.stats()
    }

    /// Evict timed-out calls now instead of waiting for the sweeper
    pub fn sweep_expired(&self) -> usize {
        self.core.sweep_expired()
    }

    /// Let queue monitors retry after the agent pool changed
    pub fn notify_pool_changed(&self) {
        self.core.wake();
    }

    /// Start the queue timeout sweeper
    pub fn start(&self) {
        self.core.spawn_sweeper();
    }

    /// Stop background tasks; queued calls are left in place
    pub fn shutdown(&self) {
        info!("🛑 Shutting down call router");
        self.core.close();
    }
}
