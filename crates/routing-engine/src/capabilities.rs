//! Boundary capabilities injected into the routers.
//!
//! Each call may take unbounded wall-clock time. Routers never hold a lock
//! across them: bookkeeping is updated before the call and reconciled after.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::work::{Call, Message, Metadata};

/// Connects a call to an agent through the telephony layer
#[async_trait]
pub trait CallConnector: Send + Sync {
    async fn connect(&self, call: &Call, agent: &Agent) -> anyhow::Result<()>;
}

/// Delivers messages through the messaging layer
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Hand a message to a human agent
    async fn deliver_to_agent(&self, message: &Message, agent: &Agent) -> anyhow::Result<()>;

    /// Send a bot-generated reply to the customer
    async fn send_response(&self, message: &Message, reply: &BotReply) -> anyhow::Result<()>;
}

/// Classified intent of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    /// Confidence in 0..=1
    pub confidence: f64,
}

impl Intent {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// Bot-generated reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotReply {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl BotReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Natural-language intent classification
#[async_trait]
pub trait IntentDetector: Send + Sync {
    async fn detect(&self, message: &Message) -> anyhow::Result<Intent>;
}

/// Bot response generation
#[async_trait]
pub trait BotResponder: Send + Sync {
    async fn respond(&self, message: &Message, intent: &Intent) -> anyhow::Result<BotReply>;
}
