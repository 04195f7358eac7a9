use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Customer, Metadata, WorkItem, WorkItemId, WorkKind};
use crate::agent::AgentId;

/// Metadata key holding the department a call is for
pub const DEPARTMENT_KEY: &str = "department";
/// Metadata key holding an explicit list of required skills
pub const REQUIRED_SKILLS_KEY: &str = "requiredSkills";

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Call status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Waiting for an agent
    Queued,
    /// Agent selected, connection in progress
    Routing,
    /// Connected to an agent
    Active,
    Completed,
    Failed,
}

/// A phone call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: WorkItemId,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub priority: u32,
    pub customer: Customer,
    pub agent_id: Option<AgentId>,
    pub queue: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Call {
    /// New inbound call from `customer`
    pub fn inbound(customer: Customer) -> Self {
        Self::new(CallDirection::Inbound, customer)
    }

    pub fn new(direction: CallDirection, customer: Customer) -> Self {
        Self {
            id: WorkItemId::new(),
            direction,
            status: CallStatus::Queued,
            priority: 0,
            customer,
            agent_id: None,
            queue: None,
            start_time: None,
            end_time: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
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

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.metadata
            .insert(DEPARTMENT_KEY.to_string(), serde_json::Value::String(department.into()));
        self
    }

    pub fn with_required_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let skills: Vec<serde_json::Value> =
            skills.into_iter().map(|s| serde_json::Value::String(s.into())).collect();
        self.metadata
            .insert(REQUIRED_SKILLS_KEY.to_string(), serde_json::Value::Array(skills));
        self
    }

    pub fn department(&self) -> Option<&str> {
        self.metadata.get(DEPARTMENT_KEY).and_then(|v| v.as_str())
    }

    /// Skill set derived from the call: explicit required skills plus the department
    pub fn derived_skills(&self) -> Vec<String> {
        let mut skills: Vec<String> = self
            .metadata
            .get(REQUIRED_SKILLS_KEY)
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        if let Some(department) = self.department() {
            if !skills.iter().any(|s| s == department) {
                skills.push(department.to_string());
            }
        }
        skills
    }

    /// Time between connection and hang-up
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }
}

impl WorkItem for Call {
    fn id(&self) -> &WorkItemId {
        &self.id
    }

    fn kind(&self) -> WorkKind {
        WorkKind::Call
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
        self.agent_id.clone()
    }

    fn queue_name(&self) -> Option<String> {
        self.queue.clone()
    }

    fn is_assigned(&self) -> bool {
        self.status == CallStatus::Active
    }

    fn enter_queue(&mut self, queue: &str) {
        self.status = CallStatus::Queued;
        self.queue = Some(queue.to_string());
        self.agent_id = None;
    }

    fn begin_assignment(&mut self, agent: &AgentId) {
        self.status = CallStatus::Routing;
        self.agent_id = Some(agent.clone());
    }

    fn confirm_assignment(&mut self) {
        self.status = CallStatus::Active;
        self.start_time = Some(Utc::now());
    }

    fn fail_assignment(&mut self) {
        self.status = CallStatus::Failed;
        self.agent_id = None;
    }

    fn fail(&mut self) {
        self.status = CallStatus::Failed;
        self.end_time = Some(Utc::now());
    }

    fn complete(&mut self) -> Option<Duration> {
        self.status = CallStatus::Completed;
        self.end_time = Some(Utc::now());
        self.duration()
    }
}
