use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use switchboard_infra_common::EventBus;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentId, Requirements};
use crate::balancer::LoadBalancer;
use crate::config::OverflowConfig;
use crate::error::{Result, RoutingError};
use crate::events::RoutingEvent;
use crate::queue::{EnqueueError, QueueLimits, QueueManager, QueueStats};
use crate::work::{WorkItem, WorkItemId};

/// How a routed item was admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    /// Handed to an agent
    Assigned { agent_id: AgentId, via_overflow: bool },
    /// Waiting in a queue
    Queued {
        queue: String,
        position: usize,
        priority: u32,
    },
    /// Assignment failed; re-queued with decayed priority
    Requeued { queue: String, priority: u32 },
    /// Answered by the bot without an agent
    BotHandled { intent: String, confidence: f64 },
}

/// Router counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub active: usize,
    pub queued: usize,
    pub assigned: u64,
    pub completed: u64,
    pub failed: u64,
    pub requeued: u64,
    pub overflowed: u64,
    pub bot_handled: u64,
    pub handoffs: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) assigned: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) requeued: AtomicU64,
    pub(crate) overflowed: AtomicU64,
    pub(crate) bot_handled: AtomicU64,
    pub(crate) handoffs: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The kind-specific half of an assignment: who may take an item and how it
/// is handed over
#[async_trait]
pub(crate) trait Handover<W: WorkItem>: Send + Sync {
    fn requirements(&self, item: &W) -> Requirements;

    async fn hand_over(&self, item: &W, agent: &Agent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct DispatchSettings {
    /// Used in logs and component error events
    pub(crate) component: &'static str,
    pub(crate) max_active: usize,
    pub(crate) priority_routing: bool,
    pub(crate) priority_floor: u32,
    pub(crate) priority_decrement: u32,
    pub(crate) queue_defaults: QueueLimits,
    pub(crate) queue_overrides: Vec<(String, QueueLimits)>,
    pub(crate) drain_poll: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) overflow: OverflowConfig,
}

enum AssignOutcome<W> {
    Assigned(AgentId),
    /// No capable agent with spare capacity, or the admission limit is reached
    NoAgent(W),
    Failed { item: W, error: RoutingError },
}

/// Admission, queueing and draining shared by the call and message routers.
///
/// Each item lives in exactly one of the active table or one queue, except
/// for the moment an admission decision is being made. Agent load is only
/// changed through the pool's reserve/release critical section, and no lock
/// is held across a hand-over.
pub(crate) struct DispatchCore<W: WorkItem> {
    settings: DispatchSettings,
    balancer: Arc<LoadBalancer>,
    handover: Arc<dyn Handover<W>>,
    events: EventBus,
    queues: Mutex<QueueManager<W>>,
    active: DashMap<WorkItemId, W>,
    /// Admission slots taken, including hand-overs still in flight
    slots: AtomicUsize,
    wakeup: Notify,
    drainers: DashSet<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    pub(crate) counters: Counters,
}

impl<W: WorkItem> DispatchCore<W> {
    pub(crate) fn new(
        settings: DispatchSettings,
        balancer: Arc<LoadBalancer>,
        handover: Arc<dyn Handover<W>>,
        events: EventBus,
    ) -> Self {
        let mut queues = QueueManager::new(settings.queue_defaults);
        for (name, limits) in &settings.queue_overrides {
            queues.configure_queue(name.clone(), *limits);
        }

        Self {
            settings,
            balancer,
            handover,
            events,
            queues: Mutex::new(queues),
            active: DashMap::new(),
            slots: AtomicUsize::new(0),
            wakeup: Notify::new(),
            drainers: DashSet::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub(crate) fn publish(&self, event: RoutingEvent) {
        self.events.publish(event);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Direct-assign `item`, falling back to `queue` when no agent can take it
    pub(crate) async fn admit(self: &Arc<Self>, item: W, queue: &str) -> Result<Admission> {
        if self.is_closed() {
            return Err(RoutingError::internal(format!("{} is shut down", self.settings.component)));
        }

        let reqs = self.handover.requirements(&item);
        match self.try_assign(item, &reqs, None).await? {
            AssignOutcome::Assigned(agent_id) => Ok(Admission::Assigned {
                agent_id,
                via_overflow: false,
            }),
            AssignOutcome::NoAgent(item) => {
                debug!("No agent available for {}, queuing in {}", item.id(), queue);
                self.enqueue(item, queue, &reqs).await
            }
            AssignOutcome::Failed { item, error } => self.retry_or_fail(item, queue, error),
        }
    }

    /// Reserve an agent, record the item as active, then hand it over with no
    /// lock held and reconcile on the result.
    async fn try_assign(
        &self,
        mut item: W,
        reqs: &Requirements,
        restrict_to: Option<&[AgentId]>,
    ) -> Result<AssignOutcome<W>> {
        let max_active = self.settings.max_active;
        let slot = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max_active).then_some(n + 1));
        if slot.is_err() {
            debug!("{} at its admission limit of {}", self.settings.component, max_active);
            return Ok(AssignOutcome::NoAgent(item));
        }

        let reserved = self.balancer.reserve(|agent| {
            reqs.is_satisfied_by(agent)
                && match restrict_to {
                    Some(ids) => ids.contains(&agent.id),
                    None => !self.is_backup(&agent.id),
                }
        });
        let agent = match reserved {
            Ok(agent) => agent,
            Err(reason) => {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                debug!("{} {}: {}", item.kind(), item.id(), reason);
                return Ok(AssignOutcome::NoAgent(item));
            }
        };

        let item_id = item.id().clone();
        let kind = item.kind();
        item.begin_assignment(&agent.id);
        self.active.insert(item_id.clone(), item.clone());
        info!("🎯 Routing {} {} to agent {}", kind, item_id, agent.id);
        self.publish(RoutingEvent::Routing {
            item_id: item_id.clone(),
            kind,
            agent_id: agent.id.clone(),
        });

        let result = self.handover.hand_over(&item, &agent).await;

        match result {
            Ok(()) => {
                let committed = match self.active.get_mut(&item_id) {
                    Some(mut entry) => {
                        entry.confirm_assignment();
                        true
                    }
                    None => false,
                };

                if !committed {
                    error!("{} {} vanished from the active table during hand-over", kind, item_id);
                    self.balancer.pool().release(&agent.id);
                    self.slots.fetch_sub(1, Ordering::AcqRel);
                    self.publish(RoutingEvent::ComponentError {
                        component: self.settings.component.to_string(),
                        message: format!("{} {} lost during assignment", kind, item_id),
                    });
                    return Err(RoutingError::internal(format!("{} lost during assignment", item_id)));
                }

                self.balancer.record_success(&agent.id);
                Counters::bump(&self.counters.assigned);
                info!("✅ {} {} assigned to agent {}", kind, item_id, agent.id);
                self.publish(RoutingEvent::Assigned {
                    item_id,
                    kind,
                    agent_id: agent.id.clone(),
                    via_overflow: restrict_to.is_some(),
                });
                Ok(AssignOutcome::Assigned(agent.id))
            }
            Err(e) => {
                warn!("❌ Hand-over of {} {} to agent {} failed: {}", kind, item_id, agent.id, e);

                let mut item = self.active.remove(&item_id).map(|(_, w)| w).unwrap_or(item);
                self.balancer.pool().release(&agent.id);
                self.slots.fetch_sub(1, Ordering::AcqRel);
                self.balancer.record_failure(&agent.id);
                item.fail_assignment();
                // The released slot may let a drain loop make progress
                self.wakeup.notify_waiters();

                Ok(AssignOutcome::Failed {
                    item,
                    error: RoutingError::AssignmentFailure {
                        item_id: item_id.to_string(),
                        agent_id: agent.id.to_string(),
                        reason: e.to_string(),
                    },
                })
            }
        }
    }

    /// Queue `item`, escalating to backup agents when the queue is at its
    /// overflow threshold
    async fn enqueue(self: &Arc<Self>, mut item: W, queue: &str, reqs: &Requirements) -> Result<Admission> {
        let overflow = &self.settings.overflow;
        if overflow.enabled && !overflow.backup_agents.is_empty() {
            let (depth, full) = {
                let queues = self.queues.lock();
                (queues.len(queue), queues.is_full(queue))
            };

            if depth >= overflow.threshold || full {
                info!("🌊 Queue {} at depth {}, trying backup agents for {}", queue, depth, item.id());
                Counters::bump(&self.counters.overflowed);
                self.publish(RoutingEvent::Overflowed {
                    item_id: item.id().clone(),
                    kind: item.kind(),
                    queue: queue.to_string(),
                    depth,
                });

                match self.try_assign(item, reqs, Some(&overflow.backup_agents)).await? {
                    AssignOutcome::Assigned(agent_id) => {
                        return Ok(Admission::Assigned {
                            agent_id,
                            via_overflow: true,
                        })
                    }
                    AssignOutcome::NoAgent(returned) => item = returned,
                    AssignOutcome::Failed { item: returned, error } => {
                        debug!("Backup assignment failed: {}", error);
                        item = returned;
                    }
                }
            }
        }

        let item_id = item.id().clone();
        let kind = item.kind();
        let priority = item.priority();
        match self.push(item, queue) {
            Ok(position) => {
                self.publish(RoutingEvent::Queued {
                    item_id,
                    kind,
                    queue: queue.to_string(),
                    priority,
                    position,
                });
                Ok(Admission::Queued {
                    queue: queue.to_string(),
                    position,
                    priority,
                })
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Re-queue after a failed assignment with decayed priority, or fail
    /// terminally once the priority floor is reached
    pub(crate) fn retry_or_fail(self: &Arc<Self>, mut item: W, queue: &str, error: RoutingError) -> Result<Admission> {
        let floor = self.settings.priority_floor;
        let current = item.priority();

        if current <= floor {
            warn!("🛑 {} {} at priority floor {}, giving up", item.kind(), item.id(), floor);
            self.fail_terminal(item, &error);
            return Err(error);
        }

        let next = current.saturating_sub(self.settings.priority_decrement).max(floor);
        item.set_priority(next);
        let item_id = item.id().clone();
        let kind = item.kind();

        match self.push(item, queue) {
            Ok(_) => {
                info!("🔄 Re-queued {} {} in {} with priority {} -> {}", kind, item_id, queue, current, next);
                Counters::bump(&self.counters.requeued);
                self.publish(RoutingEvent::Requeued {
                    item_id,
                    kind,
                    queue: queue.to_string(),
                    priority: next,
                });
                Ok(Admission::Requeued {
                    queue: queue.to_string(),
                    priority: next,
                })
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Insert into a queue and make sure it is being drained
    fn push(self: &Arc<Self>, mut item: W, queue: &str) -> std::result::Result<usize, EnqueueError<W>> {
        let priority = if self.settings.priority_routing { item.priority() } else { 0 };
        item.enter_queue(queue);
        let position = self.queues.lock().add_to_queue(queue, item, priority)?;

        self.ensure_drainer(queue);
        self.wakeup.notify_waiters();
        Ok(position)
    }

    /// Turn a rejected enqueue into a terminal failure
    fn reject(&self, err: EnqueueError<W>) -> RoutingError {
        match err {
            EnqueueError::CapacityExceeded { queue, max_length, item } => {
                let error = RoutingError::CapacityExceeded { queue, max_length };
                self.fail_terminal(item, &error);
                error
            }
            duplicate @ EnqueueError::Duplicate { .. } => RoutingError::from(duplicate),
        }
    }

    pub(crate) fn fail_terminal(&self, mut item: W, error: &RoutingError) {
        item.fail();
        Counters::bump(&self.counters.failed);
        error!("💥 {} {} failed: {}", item.kind(), item.id(), error);
        self.publish(RoutingEvent::Failed {
            item_id: item.id().clone(),
            kind: item.kind(),
            failure: error.kind(),
            reason: error.to_string(),
        });
    }

    fn ensure_drainer(self: &Arc<Self>, queue: &str) {
        if self.is_closed() || !self.drainers.insert(queue.to_string()) {
            return;
        }
        let core = Arc::clone(self);
        let queue = queue.to_string();
        tokio::spawn(async move { core.drain_loop(queue).await });
    }

    /// Backup agents only take work through overflow while it is enabled
    fn is_backup(&self, agent_id: &AgentId) -> bool {
        let overflow = &self.settings.overflow;
        overflow.enabled && overflow.backup_agents.contains(agent_id)
    }

    /// Whether an item with `reqs` could be assigned right now
    fn can_assign(&self, reqs: &Requirements) -> bool {
        self.slots.load(Ordering::Acquire) < self.settings.max_active
            && self
                .balancer
                .pool()
                .any(|agent| reqs.is_satisfied_by(agent) && !self.is_backup(&agent.id))
    }

    /// Drain one queue until it is empty. Each round takes the first entry in
    /// priority-major, enqueue-time-minor order that some agent can serve;
    /// entries nobody can serve stay put until an agent appears or they time
    /// out.
    async fn drain_loop(self: Arc<Self>, queue: String) {
        info!("👁️ Starting queue monitor for queue: {}", queue);

        loop {
            if self.is_closed() {
                self.drainers.remove(&queue);
                break;
            }

            // Register for wakeups before looking at the queue so none is missed
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut queues = self.queues.lock();
                if queues.len(&queue) == 0 {
                    // Retire under the queue lock: a concurrent push either
                    // lands before this check or spawns a fresh drainer
                    self.drainers.remove(&queue);
                    None
                } else {
                    Some(queues.take_first_where(&queue, |item| {
                        self.can_assign(&self.handover.requirements(item))
                    }))
                }
            };

            let queued = match next {
                None => {
                    info!("✅ Queue {} is now empty, stopping monitor", queue);
                    break;
                }
                Some(None) => {
                    self.wait(notified).await;
                    continue;
                }
                Some(Some(queued)) => queued,
            };

            let (item, ticket) = queued.into_parts();
            debug!("📤 Draining {} from {} after {:?}", item.id(), queue, ticket.queued_at());
            let reqs = self.handover.requirements(&item);

            match self.try_assign(item, &reqs, None).await {
                Ok(AssignOutcome::Assigned(_)) => {}
                Ok(AssignOutcome::NoAgent(item)) => {
                    // Lost the agent to another router or queue
                    let restored = self.queues.lock().restore(item, ticket);
                    if let Err(err) = restored {
                        let error = RoutingError::internal(format!("could not restore item to {}", queue));
                        self.fail_terminal(err.into_item(), &error);
                    }
                    self.wait(notified).await;
                }
                Ok(AssignOutcome::Failed { item, error }) => {
                    // Terminal failures are already published
                    let _ = self.retry_or_fail(item, &queue, error);
                }
                Err(e) => {
                    error!("Queue monitor for {} hit an error: {}", queue, e);
                    self.publish(RoutingEvent::ComponentError {
                        component: self.settings.component.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn wait(&self, notified: std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>) {
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(self.settings.drain_poll) => {}
        }
    }

    /// Wake every drain loop, e.g. after the agent pool changed
    pub(crate) fn wake(&self) {
        self.wakeup.notify_waiters();
    }

    /// Evict timed-out queue entries and publish their failures
    pub(crate) fn sweep_expired(&self) -> usize {
        let expired = self.queues.lock().evict_expired();
        let count = expired.len();
        for entry in expired {
            let error = RoutingError::Timeout {
                item_id: entry.item.id().to_string(),
                queue: entry.queue,
                waited_ms: entry.waited.as_millis() as u64,
            };
            self.fail_terminal(entry.item, &error);
        }
        count
    }

    pub(crate) fn spawn_sweeper(self: &Arc<Self>) {
        let core = Arc::clone(self);
        let period = self.settings.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if core.is_closed() {
                    break;
                }
                let evicted = core.sweep_expired();
                if evicted > 0 {
                    debug!("⏰ Timeout sweep evicted {} items", evicted);
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Complete an assigned item: release its agent and drop it from the
    /// active table
    pub(crate) fn complete(&self, id: &WorkItemId) -> Result<W> {
        let removed = self.active.remove_if(id, |_, item| item.is_assigned());
        let (_, mut item) = match removed {
            Some(entry) => entry,
            None if self.active.contains_key(id) => {
                return Err(RoutingError::invalid_input(format!("{} is still being assigned", id)));
            }
            None => {
                error!("Completion requested for unknown item {}", id);
                return Err(RoutingError::not_found(id.to_string()));
            }
        };

        let duration = item.complete();
        let agent_id = item.assigned_agent();
        if let Some(agent_id) = &agent_id {
            self.balancer.pool().release(agent_id);
        }
        self.slots.fetch_sub(1, Ordering::AcqRel);
        Counters::bump(&self.counters.completed);

        info!("🏁 {} {} completed", item.kind(), id);
        self.publish(RoutingEvent::Completed {
            item_id: id.clone(),
            kind: item.kind(),
            agent_id,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        });
        self.wakeup.notify_waiters();
        Ok(item)
    }

    pub(crate) fn active_item(&self, id: &WorkItemId) -> Option<W> {
        self.active.get(id).map(|entry| entry.value().clone())
    }

    pub(crate) fn active_items(&self) -> Vec<W> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn queued_item(&self, id: &WorkItemId) -> Option<W> {
        self.queues.lock().peek_item(id)
    }

    pub(crate) fn is_queued(&self, id: &WorkItemId) -> bool {
        self.queues.lock().contains(id)
    }

    pub(crate) fn queue_len(&self, queue: &str) -> usize {
        self.queues.lock().len(queue)
    }

    pub(crate) fn queue_stats(&self) -> Vec<QueueStats> {
        self.queues.lock().all_stats()
    }

    pub(crate) fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            active: self.active.len(),
            queued: self.queues.lock().total_len(),
            assigned: c.assigned.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
            overflowed: c.overflowed.load(Ordering::Relaxed),
            bot_handled: c.bot_handled.load(Ordering::Relaxed),
            handoffs: c.handoffs.load(Ordering::Relaxed),
        }
    }

    /// Stop background work. Queued items stay where they are.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.wakeup.notify_waiters();
    }
}
