use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use switchboard_infra_common::EventBus;
use tracing::{debug, info, warn};

use super::dispatch::{Admission, Counters, DispatchCore, Handover, RouterStats};
use super::{dispatch_settings, GENERAL_QUEUE, VIP_QUEUE};
use crate::agent::{Agent, Requirements};
use crate::balancer::LoadBalancer;
use crate::capabilities::{BotReply, BotResponder, Intent, IntentDetector, MessageTransport};
use crate::config::{BotConfig, BulkConfig, ChannelPriority, HandoffConfig, RoutingConfig, RoutingRulesConfig};
use crate::error::{Result, RoutingError};
use crate::events::RoutingEvent;
use crate::queue::QueueStats;
use crate::work::{Message, WorkItem, WorkItemId};

/// Handoff reason recorded when the bot could not produce or send a reply
pub const REASON_BOT_RESPONSE_FAILED: &str = "bot_response_failed";
/// Handoff reason recorded when intent confidence is below the threshold
pub const REASON_LOW_CONFIDENCE: &str = "low_confidence";
/// Handoff reason recorded when intent detection errored
pub const REASON_INTENT_FAILED: &str = "intent_detection_failed";

struct MessageHandover {
    transport: Arc<dyn MessageTransport>,
    rules: RoutingRulesConfig,
}

#[async_trait]
impl Handover<Message> for MessageHandover {
    fn requirements(&self, message: &Message) -> Requirements {
        message_requirements(&self.rules, message)
    }

    async fn hand_over(&self, message: &Message, agent: &Agent) -> anyhow::Result<()> {
        self.transport.deliver_to_agent(message, agent).await
    }
}

/// Capability filter for a message; the agent always needs the channel skill
pub fn message_requirements(rules: &RoutingRulesConfig, message: &Message) -> Requirements {
    let mut reqs = Requirements::new().with_channel_skill(message.channel.as_str());

    if message.customer.vip {
        reqs = reqs.with_vip_skill(rules.vip_skill.clone());
    }

    if rules.language_based_routing {
        if let Some(language) = &message.customer.language {
            reqs = reqs.with_language(language.clone());
        }
    }

    reqs
}

/// Claim on a message id for the length of one `route` call
struct InFlight<'a> {
    claims: &'a DashSet<WorkItemId>,
    id: WorkItemId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

enum BotOutcome {
    Handled(Admission),
    /// Intent detection unavailable; route to a human as-is
    Fallback,
    Failed(&'static str),
}

/// Multi-channel message admission: bot attempt, then direct assignment or
/// queueing, with human handoff when the bot fails
#[derive(Clone)]
pub struct MessageRouter {
    core: Arc<DispatchCore<Message>>,
    /// Ids between arrival and landing in the active table or a queue
    in_flight: Arc<DashSet<WorkItemId>>,
    transport: Arc<dyn MessageTransport>,
    intents: Arc<dyn IntentDetector>,
    bot: Arc<dyn BotResponder>,
    bot_config: BotConfig,
    handoff: HandoffConfig,
    bulk: BulkConfig,
    channel_priority: Vec<ChannelPriority>,
}

impl MessageRouter {
    /// Create a new message router
    pub fn new(
        config: &RoutingConfig,
        balancer: Arc<LoadBalancer>,
        transport: Arc<dyn MessageTransport>,
        intents: Arc<dyn IntentDetector>,
        bot: Arc<dyn BotResponder>,
        events: EventBus,
    ) -> Self {
        let handover = Arc::new(MessageHandover {
            transport: Arc::clone(&transport),
            rules: config.routing.clone(),
        });
        let settings = dispatch_settings(config, "message_router", config.general.max_concurrent_messages);

        Self {
            core: Arc::new(DispatchCore::new(settings, balancer, handover, events)),
            in_flight: Arc::new(DashSet::new()),
            transport,
            intents,
            bot,
            bot_config: config.messaging.bot.clone(),
            handoff: config.messaging.handoff.clone(),
            bulk: config.messaging.bulk.clone(),
            channel_priority: config.messaging.channel_priority.clone(),
        }
    }

    /// Route an inbound message through the bot, an agent, or a queue
    ///
    /// A second `route` of the same id fails with `AlreadyQueued` while the
    /// first is still talking to the bot, waiting in a queue, or assigned.
    pub async fn route(&self, mut message: Message) -> Result<Admission> {
        let _claim = self.claim(&message.id)?;
        if self.core.is_closed() {
            return Err(RoutingError::internal("message_router is shut down"));
        }

        info!(
            "💬 Routing message {} on {} (priority: {}, vip: {})",
            message.id, message.channel, message.priority, message.customer.vip
        );

        if self.bot_eligible(&message) {
            match self.try_bot(&mut message).await {
                BotOutcome::Handled(admission) => return Ok(admission),
                BotOutcome::Fallback => {
                    debug!("Intent detection unavailable, routing {} to an agent", message.id);
                }
                BotOutcome::Failed(reason) => {
                    if !self.handoff.enabled {
                        let error = RoutingError::bot(format!("{} for message {}", reason, message.id));
                        self.core.fail_terminal(message, &error);
                        return Err(error);
                    }
                    self.hand_off(&mut message, reason);
                }
            }
        }

        let queue = self.prepare_for_agents(&mut message);
        self.core.admit(message, &queue).await
    }

    /// Route a batch, at most `bulk.max_concurrency` messages at a time.
    ///
    /// Outcomes are returned in input order.
    pub async fn route_bulk(&self, messages: Vec<Message>) -> Result<Vec<(WorkItemId, Result<Admission>)>> {
        if messages.len() > self.bulk.max_batch_size {
            return Err(RoutingError::invalid_input(format!(
                "batch of {} exceeds the limit of {}",
                messages.len(),
                self.bulk.max_batch_size
            )));
        }

        info!("📦 Routing batch of {} messages", messages.len());
        let outcomes = stream::iter(messages)
            .map(|message| async move {
                let id = message.id.clone();
                (id, self.route(message).await)
            })
            .buffered(self.bulk.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes)
    }

    /// Claim the id first, then look for it elsewhere: a route that already
    /// finished has its message active or queued before it lets go.
    fn claim(&self, id: &WorkItemId) -> Result<InFlight<'_>> {
        if !self.in_flight.insert(id.clone()) {
            debug!("Message {} is already being routed", id);
            return Err(RoutingError::AlreadyQueued(id.to_string()));
        }
        let claim = InFlight {
            claims: &self.in_flight,
            id: id.clone(),
        };
        if self.core.active_item(id).is_some() || self.core.is_queued(id) {
            return Err(RoutingError::AlreadyQueued(id.to_string()));
        }
        Ok(claim)
    }

    fn bot_eligible(&self, message: &Message) -> bool {
        self.bot_config.enabled
            && self.bot_config.channels.contains(&message.channel)
            && message.priority < self.handoff.threshold
    }

    /// Classify, then generate and send a reply. No agent is involved.
    async fn try_bot(&self, message: &mut Message) -> BotOutcome {
        message.mark_processing();

        let intent = match self.intents.detect(message).await {
            Ok(intent) => intent,
            Err(e) if self.bot_config.fallback_enabled => {
                warn!("Intent detection failed for {}: {}", message.id, e);
                return BotOutcome::Fallback;
            }
            Err(e) => {
                warn!("Intent detection failed for {}: {}", message.id, e);
                return BotOutcome::Failed(REASON_INTENT_FAILED);
            }
        };

        if !(0.0..=1.0).contains(&intent.confidence) {
            warn!("Intent {} for {} has unusable confidence {}", intent.name, message.id, intent.confidence);
            return BotOutcome::Failed(REASON_LOW_CONFIDENCE);
        }
        if intent.confidence < self.bot_config.intent_threshold {
            debug!(
                "Intent {} for {} below threshold ({:.2} < {:.2})",
                intent.name, message.id, intent.confidence, self.bot_config.intent_threshold
            );
            return BotOutcome::Failed(REASON_LOW_CONFIDENCE);
        }
        message.set_intent(intent.name.clone());

        let attempts = 1 + self.bot_config.max_retries;
        for attempt in 1..=attempts {
            match self.reply_once(message, &intent).await {
                Ok(()) => {
                    message.mark_sent();
                    return BotOutcome::Handled(self.finish_bot(message, intent));
                }
                Err(e) => {
                    warn!("🤖 Bot reply {}/{} for {} failed: {}", attempt, attempts, message.id, e);
                }
            }
        }

        BotOutcome::Failed(REASON_BOT_RESPONSE_FAILED)
    }

    async fn reply_once(&self, message: &Message, intent: &Intent) -> anyhow::Result<()> {
        let reply: BotReply = self.bot.respond(message, intent).await?;
        self.transport.send_response(message, &reply).await
    }

    fn finish_bot(&self, message: &mut Message, intent: Intent) -> Admission {
        let duration = message.complete();
        Counters::bump(&self.core.counters.bot_handled);
        Counters::bump(&self.core.counters.completed);

        info!("🤖 Message {} answered by bot (intent: {}, confidence: {:.2})", message.id, intent.name, intent.confidence);
        self.core.publish(RoutingEvent::BotHandled {
            item_id: message.id.clone(),
            intent: intent.name.clone(),
            confidence: intent.confidence,
        });
        self.core.publish(RoutingEvent::Completed {
            item_id: message.id.clone(),
            kind: message.kind(),
            agent_id: None,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        });

        Admission::BotHandled {
            intent: intent.name,
            confidence: intent.confidence,
        }
    }

    /// Raise priority and record why the bot gave up
    fn hand_off(&self, message: &mut Message, reason: &str) {
        let priority = message.priority.max(self.handoff.priority);
        message.set_priority(priority);
        message.set_handoff_reason(reason);
        Counters::bump(&self.core.counters.handoffs);

        info!("🙋 Handing message {} to a human ({}), priority {}", message.id, reason, priority);
        if self.handoff.notify {
            self.core.publish(RoutingEvent::HandoffRequested {
                item_id: message.id.clone(),
                reason: reason.to_string(),
                priority,
            });
        }
    }

    /// Apply the channel table and pick the queue
    fn prepare_for_agents(&self, message: &mut Message) -> String {
        if let Some(entry) = self.channel_priority.iter().find(|c| c.channel == message.channel) {
            if entry.priority > message.priority {
                message.set_priority(entry.priority);
            }
            return entry.queue.clone();
        }
        self.queue_name_for(message)
    }

    /// Queue a message waits in: channel table, then VIP, then general
    pub fn queue_name_for(&self, message: &Message) -> String {
        if let Some(entry) = self.channel_priority.iter().find(|c| c.channel == message.channel) {
            return entry.queue.clone();
        }
        if message.customer.vip {
            return VIP_QUEUE.to_string();
        }
        GENERAL_QUEUE.to_string()
    }

    /// Finish a message an agent has handled
    pub fn complete_message(&self, message_id: &WorkItemId) -> Result<Message> {
        self.core.complete(message_id)
    }

    pub fn active_message(&self, message_id: &WorkItemId) -> Option<Message> {
        self.core.active_item(message_id)
    }

    pub fn active_messages(&self) -> Vec<Message> {
        self.core.active_items()
    }

    pub fn queued_message(&self, message_id: &WorkItemId) -> Option<Message> {
        self.core.queued_item(message_id)
    }

    pub fn is_queued(&self, message_id: &WorkItemId) -> bool {
        self.core.is_queued(message_id)
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

    pub fn sweep_expired(&self) -> usize {
        self.core.sweep_expired()
    }

    pub fn notify_pool_changed(&self) {
        self.core.wake();
    }

    pub fn start(&self) {
        self.core.spawn_sweeper();
    }

    pub fn shutdown(&self) {
        info!("🛑 Shutting down message router");
        self.core.close();
    }
}
