use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents a type of event
pub type EventType = &'static str;

/// Priority levels for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    /// Low priority events
    Low = 0,
    /// Default priority events
    Normal = 1,
    /// High priority events
    High = 2,
    /// Critical events that must be processed immediately
    Critical = 3,
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

/// Common trait for all events
pub trait Event: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Return the type identifier for this event
    fn event_type() -> EventType;

    /// Return the priority of this particular event
    fn priority(&self) -> EventPriority {
        EventPriority::Normal
    }
}

/// General error type for event operations
#[derive(Debug, Error)]
pub enum EventError {
    /// The channel for this event type has been closed
    #[error("Event channel closed: {0}")]
    ChannelClosed(String),
}

/// Result type for event operations
pub type EventResult<T> = Result<T, EventError>;
