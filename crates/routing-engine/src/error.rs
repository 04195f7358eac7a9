use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Named queue is at its configured maximum length
    #[error("Queue {queue} is full ({max_length} entries)")]
    CapacityExceeded { queue: String, max_length: usize },

    /// Item aged out of a queue before an agent took it
    #[error("Item {item_id} timed out in queue {queue} after {waited_ms}ms")]
    Timeout { item_id: String, queue: String, waited_ms: u64 },

    /// No eligible agent matches the item's requirements
    #[error("No suitable agent: {0}")]
    NoSuitableAgent(String),

    /// Boundary connect/deliver call failed after an agent was held
    #[error("Assignment of {item_id} to agent {agent_id} failed: {reason}")]
    AssignmentFailure { item_id: String, agent_id: String, reason: String },

    /// Bot could not handle the message
    #[error("Bot failure: {0}")]
    BotFailure(String),

    /// Id absent from the active-work table
    #[error("Not found: {0}")]
    NotFound(String),

    /// Item is already queued
    #[error("Already queued: {0}")]
    AlreadyQueued(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoutingError {
    /// Create a new NoSuitableAgent error
    pub fn no_suitable_agent<S: Into<String>>(msg: S) -> Self {
        Self::NoSuitableAgent(msg.into())
    }

    /// Create a new BotFailure error
    pub fn bot<S: Into<String>>(msg: S) -> Self {
        Self::BotFailure(msg.into())
    }

    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new InvalidInput error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Failure classification carried in notifications
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CapacityExceeded { .. } => FailureKind::CapacityExceeded,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::NoSuitableAgent(_) => FailureKind::NoSuitableAgent,
            Self::AssignmentFailure { .. } => FailureKind::AssignmentFailure,
            Self::BotFailure(_) => FailureKind::BotFailure,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::AlreadyQueued(_) | Self::Config(_) | Self::InvalidInput(_) | Self::Internal(_) => {
                FailureKind::Internal
            }
        }
    }
}

impl From<switchboard_infra_common::Error> for RoutingError {
    fn from(err: switchboard_infra_common::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Serializable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CapacityExceeded,
    Timeout,
    NoSuitableAgent,
    AssignmentFailure,
    BotFailure,
    NotFound,
    Internal,
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
