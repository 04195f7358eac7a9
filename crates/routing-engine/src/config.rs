use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use switchboard_infra_common::config::ConfigLoader;

use crate::agent::AgentId;
use crate::error::{Result, RoutingError};
use crate::queue::QueueLimits;
use crate::work::ChannelKind;

/// Environment prefix for configuration overrides, e.g.
/// `SWITCHBOARD__QUEUES__MAX_QUEUE_LENGTH=50`
pub const ENV_PREFIX: &str = "SWITCHBOARD";

/// Routing engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Admission limits and background task cadence
    pub general: GeneralConfig,

    /// Queue management configuration
    pub queues: QueueConfig,

    /// Routing feature toggles
    pub routing: RoutingRulesConfig,

    /// Overflow escalation policy
    pub overflow: OverflowConfig,

    /// Agent failover policy
    pub failover: FailoverConfig,

    /// Load balancer configuration
    pub load_balancing: LoadBalancingConfig,

    /// Bot, handoff and bulk messaging configuration
    pub messaging: MessagingConfig,
}

/// General routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Maximum number of concurrently active calls
    pub max_concurrent_calls: usize,

    /// Maximum number of concurrently active messages
    pub max_concurrent_messages: usize,

    /// Fallback poll interval of queue drain loops (milliseconds)
    pub drain_poll_interval_ms: u64,

    /// Interval of the queue timeout sweep (milliseconds)
    pub timeout_sweep_interval_ms: u64,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default maximum entries per queue
    pub max_queue_length: usize,

    /// Default maximum wait in a queue (milliseconds)
    pub timeout_ms: u64,

    /// Priority at which retries stop
    pub priority_floor: u32,

    /// Priority lost on each failed assignment
    pub priority_decrement: u32,

    /// Per-queue overrides keyed by queue name
    pub queues: HashMap<String, QueueOverride>,
}

/// Limits for one named queue; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOverride {
    pub max_queue_length: Option<usize>,
    pub timeout_ms: Option<u64>,
}

/// Routing feature toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRulesConfig {
    /// Match agents against the skills derived from a call
    pub skill_based_routing: bool,

    /// Order queues by item priority; FIFO when disabled
    pub priority_routing: bool,

    /// Queue calls under their department name
    pub department_routing: bool,

    /// Require agents to speak the customer's language
    pub language_based_routing: bool,

    /// Send non-VIP calls outside business hours to the after-hours queue
    pub time_based_routing: bool,

    pub business_hours: BusinessHours,

    /// Skill tag required to serve VIP customers
    pub vip_skill: String,
}

/// Daily window in which calls are routed normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHours {
    /// First hour of the window (0-23)
    pub start_hour: u32,

    /// Hour the window closes (1-24, exclusive)
    pub end_hour: u32,

    /// Offset from UTC of the local clock (minutes)
    pub utc_offset_minutes: i32,
}

impl BusinessHours {
    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = match FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)) {
            Some(offset) => now.with_timezone(&offset).hour(),
            None => now.hour(),
        };

        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Window wraps past midnight
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Overflow escalation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    pub enabled: bool,

    /// Queue depth at which backup agents are tried
    pub threshold: usize,

    pub backup_agents: Vec<AgentId>,
}

/// Agent failover policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,

    /// Consecutive assignment failures before an agent is taken offline
    pub max_failures: u32,
}

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    LeastBusy,
    RoundRobin,
    WeightedCapacity,
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    pub strategy: LoadBalanceStrategy,

    /// Health check interval (milliseconds)
    pub health_check_interval_ms: u64,

    /// Silence after which a health check counts as missed (milliseconds)
    pub heartbeat_timeout_ms: u64,

    /// Missed checks before an agent is marked unavailable
    pub failure_threshold: u32,

    /// Utilization at or above which a scale-up signal is emitted
    pub scale_up_threshold: f64,

    /// Utilization at or below which a scale-down signal is emitted
    pub scale_down_threshold: f64,
}

/// Messaging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub bot: BotConfig,
    pub handoff: HandoffConfig,
    pub bulk: BulkConfig,

    /// Per-channel queue names and minimum priorities
    pub channel_priority: Vec<ChannelPriority>,
}

/// Bot handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub enabled: bool,

    /// Minimum intent confidence for a bot reply (0-1)
    pub intent_threshold: f64,

    /// Route to humans when intent detection itself errors
    pub fallback_enabled: bool,

    /// Extra attempts at generating and sending a bot reply
    pub max_retries: u32,

    /// Channels the bot may answer
    pub channels: Vec<ChannelKind>,
}

/// Human handoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub enabled: bool,

    /// Messages at or above this priority skip the bot
    pub threshold: u32,

    /// Priority a message is raised to on handoff
    pub priority: u32,

    /// Publish a notification when handoff happens
    pub notify: bool,
}

/// Bulk messaging limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_batch_size: usize,
    pub max_concurrency: usize,
}

/// Queue assignment for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPriority {
    pub channel: ChannelKind,
    pub queue: String,
    /// Messages on this channel are routed with at least this priority
    #[serde(default)]
    pub priority: u32,
}

impl RoutingConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| RoutingError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file layered under `SWITCHBOARD__*` environment
    /// overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut loader = ConfigLoader::new().with_env_prefix(ENV_PREFIX);
        if let Some(path) = path {
            loader = loader.with_file(path);
        }
        let config: Self = loader.load()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.general.max_concurrent_calls == 0 {
            return Err(RoutingError::config("max_concurrent_calls must be greater than 0"));
        }

        if self.general.max_concurrent_messages == 0 {
            return Err(RoutingError::config("max_concurrent_messages must be greater than 0"));
        }

        if self.general.drain_poll_interval_ms == 0 || self.general.timeout_sweep_interval_ms == 0 {
            return Err(RoutingError::config("background task intervals must be greater than 0"));
        }

        if self.queues.max_queue_length == 0 {
            return Err(RoutingError::config("max_queue_length must be greater than 0"));
        }

        for (name, limits) in &self.queues.queues {
            if limits.max_queue_length == Some(0) {
                return Err(RoutingError::config(format!(
                    "queue {} max_queue_length must be greater than 0",
                    name
                )));
            }
        }

        if self.queues.priority_decrement == 0 {
            return Err(RoutingError::config("priority_decrement must be greater than 0"));
        }

        let hours = &self.routing.business_hours;
        if hours.start_hour > 23 || hours.end_hour > 24 || hours.start_hour == hours.end_hour {
            return Err(RoutingError::config(format!(
                "invalid business hours {}-{}",
                hours.start_hour, hours.end_hour
            )));
        }

        if hours.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(RoutingError::config("utc_offset_minutes must be within one day"));
        }

        if self.routing.vip_skill.is_empty() {
            return Err(RoutingError::config("vip_skill cannot be empty"));
        }

        if self.failover.enabled && self.failover.max_failures == 0 {
            return Err(RoutingError::config("failover max_failures must be greater than 0"));
        }

        let lb = &self.load_balancing;
        if lb.health_check_interval_ms == 0 || lb.failure_threshold == 0 {
            return Err(RoutingError::config(
                "health_check_interval_ms and failure_threshold must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&lb.scale_up_threshold) || !(0.0..=1.0).contains(&lb.scale_down_threshold) {
            return Err(RoutingError::config("scaling thresholds must be within 0..=1"));
        }

        if lb.scale_down_threshold >= lb.scale_up_threshold {
            return Err(RoutingError::config(
                "scale_down_threshold must be below scale_up_threshold",
            ));
        }

        if !(0.0..=1.0).contains(&self.messaging.bot.intent_threshold) {
            return Err(RoutingError::config("intent_threshold must be within 0..=1"));
        }

        if self.messaging.handoff.enabled && self.messaging.handoff.priority < self.queues.priority_floor {
            return Err(RoutingError::config(
                "handoff priority cannot be below the priority floor",
            ));
        }

        if self.messaging.bulk.max_batch_size == 0 || self.messaging.bulk.max_concurrency == 0 {
            return Err(RoutingError::config("bulk limits must be greater than 0"));
        }

        Ok(())
    }

    /// Limits applied to queues without an override
    pub fn default_queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_length: self.queues.max_queue_length,
            timeout: Duration::from_millis(self.queues.timeout_ms),
        }
    }

    /// Resolved per-queue overrides
    pub fn queue_overrides(&self) -> Vec<(String, QueueLimits)> {
        let defaults = self.default_queue_limits();
        self.queues
            .queues
            .iter()
            .map(|(name, o)| {
                (
                    name.clone(),
                    QueueLimits {
                        max_length: o.max_queue_length.unwrap_or(defaults.max_length),
                        timeout: o.timeout_ms.map(Duration::from_millis).unwrap_or(defaults.timeout),
                    },
                )
            })
            .collect()
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1000,
            max_concurrent_messages: 5000,
            drain_poll_interval_ms: 500,
            timeout_sweep_interval_ms: 1000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_length: 100,
            timeout_ms: 600_000, // 10 minutes
            priority_floor: 0,
            priority_decrement: 1,
            queues: HashMap::new(),
        }
    }
}

impl Default for RoutingRulesConfig {
    fn default() -> Self {
        Self {
            skill_based_routing: true,
            priority_routing: true,
            department_routing: true,
            language_based_routing: true,
            time_based_routing: false,
            business_hours: BusinessHours::default(),
            vip_skill: "vip".to_string(),
        }
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
            utc_offset_minutes: 0,
        }
    }
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 50,
            backup_agents: Vec::new(),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 3,
        }
    }
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::LeastBusy,
            health_check_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            failure_threshold: 3,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intent_threshold: 0.85,
            fallback_enabled: true,
            max_retries: 1,
            channels: vec![
                ChannelKind::WebChat,
                ChannelKind::Whatsapp,
                ChannelKind::Messenger,
                ChannelKind::Telegram,
                ChannelKind::Sms,
            ],
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 8,
            priority: 5,
            notify: true,
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_concurrency: 16,
        }
    }
}
