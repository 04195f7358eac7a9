//! Capability matching between work items and agents

use serde::{Deserialize, Serialize};

use super::Agent;

/// What an agent must offer to take a particular work item.
///
/// Every populated field is a hard filter; an empty requirement set matches
/// every agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Skill tag a VIP customer's agent must carry
    pub vip_skill: Option<String>,
    /// Customer language, matched case-insensitively
    pub language: Option<String>,
    /// All of these skills are required
    pub skills: Vec<String>,
    /// Skill tag of the channel the item arrived on
    pub channel_skill: Option<String>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vip_skill(mut self, skill: impl Into<String>) -> Self {
        self.vip_skill = Some(skill.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_channel_skill(mut self, skill: impl Into<String>) -> Self {
        self.channel_skill = Some(skill.into());
        self
    }

    /// Whether `agent` meets every requirement. Status and load are not
    /// considered here.
    pub fn is_satisfied_by(&self, agent: &Agent) -> bool {
        if let Some(vip) = &self.vip_skill {
            if !agent.has_skill(vip) {
                return false;
            }
        }

        if let Some(language) = &self.language {
            if !agent.speaks(language) {
                return false;
            }
        }

        if let Some(channel) = &self.channel_skill {
            if !agent.has_skill(channel) {
                return false;
            }
        }

        self.skills.iter().all(|skill| agent.has_skill(skill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Agent {
        Agent::new("a1", "Alice", 2)
            .with_skills(["vip", "billing", "sms"])
            .with_languages(["EN", "de"])
    }

    #[test]
    fn test_empty_requirements_match_anyone() {
        assert!(Requirements::new().is_satisfied_by(&Agent::new("a2", "Bob", 1)));
    }

    #[test]
    fn test_language_match_ignores_case() {
        let reqs = Requirements::new().with_language("en");
        assert!(reqs.is_satisfied_by(&agent()));

        let reqs = Requirements::new().with_language("fr");
        assert!(!reqs.is_satisfied_by(&agent()));
    }

    #[test]
    fn test_all_skills_required() {
        let reqs = Requirements::new().with_skills(["billing", "sms"]);
        assert!(reqs.is_satisfied_by(&agent()));

        let reqs = Requirements::new().with_skills(["billing", "sales"]);
        assert!(!reqs.is_satisfied_by(&agent()));
    }

    #[test]
    fn test_vip_and_channel_skills() {
        let reqs = Requirements::new().with_vip_skill("vip").with_channel_skill("sms");
        assert!(reqs.is_satisfied_by(&agent()));

        let reqs = Requirements::new().with_channel_skill("whatsapp");
        assert!(!reqs.is_satisfied_by(&agent()));

        let plain = Agent::new("a3", "Carol", 1);
        assert!(!Requirements::new().with_vip_skill("vip").is_satisfied_by(&plain));
    }
}
