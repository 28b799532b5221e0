//! Scenario report artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Forecast horizon of a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// Twelve months out.
    #[default]
    #[serde(rename = "12m")]
    TwelveMonths,
    /// Thirty-six months out.
    #[serde(rename = "36m")]
    ThirtySixMonths,
}

impl Timeframe {
    /// Wire representation (`12m` / `36m`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TwelveMonths => "12m",
            Self::ThirtySixMonths => "36m",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Positive,
    Negative,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => f.write_str("positive"),
            Self::Negative => f.write_str("negative"),
        }
    }
}

/// A finished scenario report.
///
/// Keyed by `(timeframe, variant)`. Several artifacts may share a key within
/// one session; consumers that want a single report per key should take the
/// most recent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioArtifact {
    pub timeframe: Timeframe,
    pub variant: Variant,
    pub title: String,
    pub content: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,
}

impl ScenarioArtifact {
    /// The artifact key.
    #[must_use]
    pub const fn key(&self) -> (Timeframe, Variant) {
        (self.timeframe, self.variant)
    }
}
