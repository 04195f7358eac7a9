//! Work queue management module
//!
//! Named priority queues with bounded length and timeout-based eviction.

pub mod manager;

pub use manager::{
    EnqueueError, ExpiredItem, QueueLimits, QueueManager, QueueStats, QueueTicket, QueuedItem,
};
