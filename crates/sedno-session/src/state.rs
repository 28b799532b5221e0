//! Aggregate state of one analysis session.

use chrono::{DateTime, Utc};
use sedno_core::{AnalysisConfig, ReasoningStep, ScenarioArtifact, SessionId, Timeframe, Variant};
use serde::{Deserialize, Serialize};

/// Lifecycle of a session as seen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Waiting for the backend to acknowledge the request.
    Starting,
    Streaming,
    Completed,
    Failed,
    /// Cancelled by the caller.
    Stopped,
}

impl SessionPhase {
    /// Whether the session can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Streaming)
    }
}

/// Trace, artifacts and progress of the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Option<SessionId>,
    pub query: String,
    pub config: AnalysisConfig,
    pub phase: SessionPhase,
    /// Append-only; index order is the only ordering authority.
    pub steps: Vec<ReasoningStep>,
    /// Append-only; a key may repeat.
    pub scenarios: Vec<ScenarioArtifact>,
    /// 0-100, non-decreasing.
    pub progress: f64,
    /// Latest error message.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// State of a session that is waiting for its acknowledgement.
    #[must_use]
    pub fn starting(query: impl Into<String>, config: AnalysisConfig) -> Self {
        Self {
            query: query.into(),
            config,
            phase: SessionPhase::Starting,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Most recently received artifact for a key.
    #[must_use]
    pub fn latest_scenario(&self, timeframe: Timeframe, variant: Variant) -> Option<&ScenarioArtifact> {
        self.scenarios
            .iter()
            .rev()
            .find(|scenario| scenario.key() == (timeframe, variant))
    }

    /// Number of steps still open.
    #[must_use]
    pub fn open_steps(&self) -> usize {
        self.steps.iter().filter(|step| step.status.is_open()).count()
    }
}
