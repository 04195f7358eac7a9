//! # Agent Pool
//!
//! Agents, the shared pool that tracks their load, and the capability
//! predicate used to decide who may take a given work item.

pub mod capability;
pub mod pool;
pub mod types;

pub use capability::Requirements;
pub use pool::{AgentPool, PoolStats, RosterDiff};
pub use types::{Agent, AgentId, AgentStatus};
