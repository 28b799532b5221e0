//! Session trigger payload and ancillary responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scenario::Timeframe;

/// User-selected scope of an analysis.
///
/// Region and sector ids are opaque strings; the backend owns the taxonomy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    /// Per-dimension weights, e.g. `{"economy": 0.8}`.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl AnalysisConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.regions.push(region.into());
        self
    }

    /// Add a country (ISO code).
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.countries.push(country.into());
        self
    }

    /// Add a sector.
    #[must_use]
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sectors.push(sector.into());
        self
    }

    /// Set a weight.
    pub fn set_weight(&mut self, key: impl Into<String>, weight: f64) {
        self.weights.insert(key.into(), weight);
    }
}

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub query: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    #[serde(default = "default_include_synthesis")]
    pub include_synthesis: bool,
}

fn default_timeframes() -> Vec<String> {
    vec![
        Timeframe::TwelveMonths.as_str().to_string(),
        Timeframe::ThirtySixMonths.as_str().to_string(),
    ]
}

const fn default_include_synthesis() -> bool {
    true
}

impl AnalyzeRequest {
    /// Build a request with default timeframes and synthesis enabled.
    #[must_use]
    pub fn new(query: impl Into<String>, config: &AnalysisConfig) -> Self {
        Self {
            query: query.into(),
            regions: config.regions.clone(),
            countries: config.countries.clone(),
            sectors: config.sectors.clone(),
            weights: config.weights.clone(),
            timeframes: default_timeframes(),
            include_synthesis: default_include_synthesis(),
        }
    }
}

/// Acknowledgement of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub session_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Response of `GET /api/session/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub query: String,
}

/// Response of `GET /api/session/{id}/result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResultResponse {
    pub session_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub result: Option<Value>,
}
