//! Reasoning trace entries.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Correlation, Document, Evidence, FactUnit, Hypothesis, Inference, ReasoningChain};

/// Step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Thinking,
    Searching,
    Analyzing,
    Complete,
    Error,
}

impl StepStatus {
    /// `complete` and `error` are final; a step never leaves them.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Thinking | Self::Searching | Self::Analyzing)
    }
}

/// Classification of a step for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    Plain,
    Reasoning,
    Correlation,
    Hypothesis,
    Evidence,
    Inference,
}

/// Agent family, derived from the agent id prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    Orchestrator,
    Regional,
    Country,
    Sector,
    Synthesis,
}

impl AgentType {
    /// Classify an agent id.
    #[must_use]
    pub fn classify(agent: Option<&str>) -> Self {
        let Some(agent) = agent else {
            return Self::Orchestrator;
        };
        if agent.starts_with("region") {
            Self::Regional
        } else if agent.starts_with("country") {
            Self::Country
        } else if agent.starts_with("sector") {
            Self::Sector
        } else if agent.starts_with("scenario") || agent == "synthesis" {
            Self::Synthesis
        } else {
            Self::Orchestrator
        }
    }
}

/// Human readable title for an agent id.
#[must_use]
pub fn agent_display_name(agent: Option<&str>) -> String {
    let Some(agent) = agent else {
        return "System".to_string();
    };
    match agent {
        "system" => return "System".to_string(),
        "supervisor" => return "Supervisor".to_string(),
        "meta_supervisor" => return "Meta Supervisor".to_string(),
        "synthesis" => return "Synthesis".to_string(),
        _ => {}
    }
    if let Some(region) = agent.strip_prefix("region_") {
        format!("Region: {region}")
    } else if let Some(country) = agent.strip_prefix("country_") {
        format!("Country: {country}")
    } else if let Some(sector) = agent.strip_prefix("sector_") {
        format!("Sector: {sector}")
    } else {
        agent.to_string()
    }
}

/// Kind-specific structured payload kept on a step for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StepPayload {
    Reasoning(ReasoningChain),
    Correlation(Correlation),
    Hypothesis(Hypothesis),
    Evidence(Evidence),
    Inference(Inference),
}

/// One entry of the reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Assigned at creation, strictly increasing within a session.
    pub id: u64,
    pub agent: String,
    pub agent_type: AgentType,
    pub status: StepStatus,
    pub kind: StepKind,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<FactUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StepPayload>,
    /// Advisory; trace order is insertion order.
    pub timestamp: DateTime<Utc>,
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and naive ISO-8601 (taken as UTC).
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
