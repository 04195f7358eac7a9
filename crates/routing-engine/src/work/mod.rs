//! # Work Items
//!
//! Calls and messages share one lifecycle contract, [`WorkItem`], which is all
//! the queue manager and the dispatch core need to know about them. Each
//! concrete type maps the shared lifecycle steps onto its own state machine:
//!
//! ```text
//! Call:    queued -> routing -> active -> completed        (failed from routing / timeout)
//! Message: queued -> processing -> sent -> delivered       (failed from processing)
//!                    processing -> sent -> completed       (bot handled)
//!                    processing -> delivered -> completed  (human handled)
//! ```

pub mod call;
pub mod message;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

pub use call::{Call, CallDirection, CallStatus};
pub use message::{ChannelKind, Message, MessageStatus};

/// Free-form metadata attached to customers and work items
pub type Metadata = HashMap<String, serde_json::Value>;

/// Unique identifier of a call or message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Discriminator for the two kinds of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Call,
    Message,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKind::Call => write!(f, "call"),
            WorkKind::Message => write!(f, "message"),
        }
    }
}

/// The customer behind a work item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub language: Option<String>,
    pub location: Option<String>,
    pub vip: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn vip(mut self) -> Self {
        self.vip = true;
        self
    }
}

/// Lifecycle contract shared by calls and messages.
///
/// The dispatch core drives items through these steps; each implementation
/// decides which concrete status every step maps to.
pub trait WorkItem: Clone + Debug + Send + Sync + 'static {
    fn id(&self) -> &WorkItemId;
    fn kind(&self) -> WorkKind;

    /// Higher is more urgent
    fn priority(&self) -> u32;
    fn set_priority(&mut self, priority: u32);

    fn customer(&self) -> &Customer;
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn assigned_agent(&self) -> Option<AgentId>;
    fn queue_name(&self) -> Option<String>;

    /// True once the hand-over to an agent has been confirmed
    fn is_assigned(&self) -> bool;

    /// Item handed to the queue manager under `queue`
    fn enter_queue(&mut self, queue: &str);
    /// Agent reserved, boundary call about to be issued
    fn begin_assignment(&mut self, agent: &AgentId);
    /// Boundary call succeeded
    fn confirm_assignment(&mut self);
    /// Boundary call failed; the agent reference is dropped
    fn fail_assignment(&mut self);
    /// Terminal failure
    fn fail(&mut self);
    /// Work finished; returns the handling time when known
    fn complete(&mut self) -> Option<Duration>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_ids_are_unique() {
        assert_ne!(WorkItemId::new(), WorkItemId::new());
        assert_eq!(WorkItemId::from("call-1").to_string(), "call-1");
    }

    #[test]
    fn test_customer_builder() {
        let customer = Customer::new("cust-1").with_language("en").with_location("DE").vip();
        assert!(customer.vip);
        assert_eq!(customer.language.as_deref(), Some("en"));
        assert_eq!(customer.location.as_deref(), Some("DE"));
    }
}
