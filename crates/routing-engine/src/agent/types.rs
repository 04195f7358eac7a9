use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::work::Metadata;

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Agent status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent can take work
    Available,
    /// Agent is at capacity
    Busy,
    /// Agent is signed off or suspended
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Agent information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub skills: HashSet<String>,
    #[serde(default)]
    pub languages: HashSet<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub current_load: u32,
    pub max_load: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Agent {
    /// Create an available agent with no skills and the given capacity
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>, max_load: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skills: HashSet::new(),
            languages: HashSet::new(),
            status: AgentStatus::Available,
            current_load: 0,
            max_load,
            metadata: Metadata::new(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages.extend(languages.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_load(mut self, current_load: u32) -> Self {
        self.current_load = current_load;
        self
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill)
    }

    pub fn speaks(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    /// Available and below max load
    pub fn has_capacity(&self) -> bool {
        self.status == AgentStatus::Available && self.current_load < self.max_load
    }

    /// current_load / max_load, 1.0 for a zero-capacity agent
    pub fn load_ratio(&self) -> f64 {
        if self.max_load == 0 {
            1.0
        } else {
            f64::from(self.current_load) / f64::from(self.max_load)
        }
    }
}
