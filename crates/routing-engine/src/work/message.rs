use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Customer, Metadata, WorkItem, WorkItemId, WorkKind};
use crate::agent::AgentId;

pub const AGENT_ID_KEY: &str = "agentId";
pub const QUEUE_KEY: &str = "queue";
pub const START_TIME_KEY: &str = "startTime";
pub const END_TIME_KEY: &str = "endTime";
pub const HANDOFF_REASON_KEY: &str = "handoffReason";
pub const INTENT_KEY: &str = "intent";

/// Messaging channel a message arrived on.
///
/// The snake_case name doubles as the agent skill tag required to serve the
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    WebChat,
    Sms,
    Whatsapp,
    Email,
    Messenger,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WebChat => "web_chat",
            ChannelKind::Sms => "sms",
            ChannelKind::Whatsapp => "whatsapp",
            ChannelKind::Email => "email",
            ChannelKind::Messenger => "messenger",
            ChannelKind::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Sent,
    Delivered,
    Completed,
    Failed,
}

/// An inbound customer message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: WorkItemId,
    pub channel: ChannelKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub priority: u32,
    pub customer: Customer,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(channel: ChannelKind, customer: Customer, content: impl Into<String>) -> Self {
        Self {
            id: WorkItemId::new(),
            channel,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Queued,
            priority: 0,
            customer,
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<WorkItemId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    fn set_meta_str(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .insert(key.to_string(), serde_json::Value::String(value.into()));
    }

    fn meta_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.meta_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.meta_str(AGENT_ID_KEY).map(AgentId::from)
    }

    pub fn queue(&self) -> Option<&str> {
        self.meta_str(QUEUE_KEY)
    }

    pub fn handoff_reason(&self) -> Option<&str> {
        self.meta_str(HANDOFF_REASON_KEY)
    }

    pub fn set_handoff_reason(&mut self, reason: impl Into<String>) {
        self.set_meta_str(HANDOFF_REASON_KEY, reason);
    }

    pub fn intent(&self) -> Option<&str> {
        self.meta_str(INTENT_KEY)
    }

    pub fn set_intent(&mut self, intent: impl Into<String>) {
        self.set_meta_str(INTENT_KEY, intent);
    }

    /// Bot took the message
    pub fn mark_processing(&mut self) {
        self.status = MessageStatus::Processing;
        self.set_meta_str(START_TIME_KEY, Utc::now().to_rfc3339());
    }

    /// Bot reply went out
    pub fn mark_sent(&mut self) {
        self.status = MessageStatus::Sent;
    }

    pub fn handling_time(&self) -> Option<Duration> {
        match (self.meta_time(START_TIME_KEY), self.meta_time(END_TIME_KEY)) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }
}

impl WorkItem for Message {
    fn id(&self) -> &WorkItemId {
        &self.id
    }

    fn kind(&self) -> WorkKind {
        WorkKind::Message
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    fn customer(&self) -> &Customer {
        &self.customer
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn assigned_agent(&self) -> Option<AgentId> {
        self.agent_id()
    }

    fn queue_name(&self) -> Option<String> {
        self.queue().map(str::to_string)
    }

    fn is_assigned(&self) -> bool {
        self.status == MessageStatus::Delivered
    }

    fn enter_queue(&mut self, queue: &str) {
        self.status = MessageStatus::Queued;
        self.set_meta_str(QUEUE_KEY, queue);
        self.metadata.remove(AGENT_ID_KEY);
    }

    fn begin_assignment(&mut self, agent: &AgentId) {
        self.status = MessageStatus::Processing;
        self.set_meta_str(AGENT_ID_KEY, agent.as_str());
        if self.meta_str(START_TIME_KEY).is_none() {
            self.set_meta_str(START_TIME_KEY, Utc::now().to_rfc3339());
        }
    }

    fn confirm_assignment(&mut self) {
        self.status = MessageStatus::Delivered;
    }

    fn fail_assignment(&mut self) {
        self.status = MessageStatus::Failed;
        self.metadata.remove(AGENT_ID_KEY);
    }

    fn fail(&mut self) {
        self.status = MessageStatus::Failed;
        self.set_meta_str(END_TIME_KEY, Utc::now().to_rfc3339());
    }

    fn complete(&mut self) -> Option<Duration> {
        self.status = MessageStatus::Completed;
        self.set_meta_str(END_TIME_KEY, Utc::now().to_rfc3339());
        self.handling_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_match_serde() {
        for channel in [
            ChannelKind::WebChat,
            ChannelKind::Sms,
            ChannelKind::Whatsapp,
            ChannelKind::Email,
            ChannelKind::Messenger,
            ChannelKind::Telegram,
        ] {
            let json = serde_json::to_string(&channel).unwrap();
            assert_eq!(json, format!("\"{}\"", channel.as_str()));
        }
    }

    #[test]
    fn test_human_path_lifecycle() {
        let mut message = Message::new(ChannelKind::Sms, Customer::new("c1"), "hello");
        message.enter_queue("general");
        assert_eq!(message.queue(), Some("general"));

        message.begin_assignment(&AgentId::from("agent-7"));
        assert_eq!(message.status, MessageStatus::Processing);
        assert_eq!(message.agent_id(), Some(AgentId::from("agent-7")));

        message.confirm_assignment();
        assert!(message.is_assigned());

        assert!(message.complete().is_some());
        assert_eq!(message.status, MessageStatus::Completed);
    }

    #[test]
    fn test_bot_path_lifecycle() {
        let mut message = Message::new(ChannelKind::WebChat, Customer::new("c1"), "where is my order");
        message.mark_processing();
        message.set_intent("order_status");
        message.mark_sent();
        assert_eq!(message.status, MessageStatus::Sent);

        message.complete();
        assert_eq!(message.status, MessageStatus::Completed);
        assert_eq!(message.intent(), Some("order_status"));
        assert!(message.agent_id().is_none());
    }
}
