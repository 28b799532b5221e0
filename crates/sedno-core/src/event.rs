//! Wire events pushed by the analysis backend.
//!
//! Every stream frame carries one JSON object tagged by `type`. The set of
//! kinds is closed on our side ([`EventKind`]) but the decoder is forgiving:
//! unknown tags become [`EventKind::Unknown`], and a known tag whose payload
//! has the wrong shape decodes with default payload fields instead of failing.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::scenario::{Timeframe, Variant};

/// Frame decoding error.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` tag")]
    MissingKind,
}

/// Document credibility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredibilityLevel {
    High,
    Medium,
    Low,
    Suspicious,
}

/// Credibility attached to a retrieved document.
///
/// Accepted on the wire either as a bare level (`"high"`) or as
/// `{"level": "high", "score": 0.9}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CredibilityWire")]
pub struct Credibility {
    pub level: CredibilityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredibilityWire {
    Level(CredibilityLevel),
    Scored {
        level: CredibilityLevel,
        #[serde(default)]
        score: Option<f64>,
    },
}

impl From<CredibilityWire> for Credibility {
    fn from(wire: CredibilityWire) -> Self {
        match wire {
            CredibilityWire::Level(level) => Self { level, score: None },
            CredibilityWire::Scored { level, score } => Self { level, score },
        }
    }
}

/// A retrieved source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, deserialize_with = "lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient")]
    pub relevance: f64,
    #[serde(default = "unknown_source", deserialize_with = "lenient_source")]
    pub source: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub credibility: Option<Credibility>,
}

/// A tagged unit of information extracted from sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactUnit {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Payload of a `document` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBatch {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub docs: Vec<Document>,
}

/// Payload of a `reasoning` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub steps: Vec<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Payload of a `correlation` event: two factors and how they move together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, deserialize_with = "lenient")]
    pub source: String,
    #[serde(default, deserialize_with = "lenient")]
    pub target: String,
    /// Signed strength in `-1.0..=1.0`.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Payload of a `hypothesis` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    #[serde(default, deserialize_with = "lenient")]
    pub statement: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub testable_predictions: Vec<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Payload of an `evidence` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    /// `Some(false)` when the evidence contradicts the hypothesis.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub supports: Option<bool>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub facts: Vec<FactUnit>,
}

/// Payload of an `inference` event: the full fact → chain → prediction path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub facts: Vec<FactUnit>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub chain: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub prediction: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub horizon: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub assumptions: Vec<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Payload of a `scenario` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPayload {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,
}

/// Payload of a `report` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Payload of a `done` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Done {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Kind-specific part of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Thinking,
    SearchingProgress,
    DocumentBatch(DocumentBatch),
    Reasoning(ReasoningChain),
    Correlation(Correlation),
    Hypothesis(Hypothesis),
    Evidence(Evidence),
    Inference(Inference),
    Scenario(ScenarioPayload),
    ReportSection(ReportSection),
    Error,
    Done(Done),
    Heartbeat,
    /// A tag this client does not know. Carried for logging, never reduced.
    Unknown(String),
}

impl EventKind {
    /// Tag written on the wire for this kind.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Thinking => "thinking",
            Self::SearchingProgress => "progress",
            Self::DocumentBatch(_) => "document",
            Self::Reasoning(_) => "reasoning",
            Self::Correlation(_) => "correlation",
            Self::Hypothesis(_) => "hypothesis",
            Self::Evidence(_) => "evidence",
            Self::Inference(_) => "inference",
            Self::Scenario(_) => "scenario",
            Self::ReportSection(_) => "report",
            Self::Error => "error",
            Self::Done(_) => "done",
            Self::Heartbeat => "heartbeat",
            Self::Unknown(tag) => tag,
        }
    }

    fn decode(tag: &str, frame: &Value) -> Self {
        match tag {
            "thinking" => Self::Thinking,
            "progress" | "searching" | "searching-progress" | "searching_progress" => {
                Self::SearchingProgress
            }
            "document" | "documents" | "document-batch" | "document_batch" => {
                Self::DocumentBatch(payload(tag, frame))
            }
            "reasoning" => Self::Reasoning(payload(tag, frame)),
            "correlation" => Self::Correlation(payload(tag, frame)),
            "hypothesis" => Self::Hypothesis(payload(tag, frame)),
            "evidence" => Self::Evidence(payload(tag, frame)),
            "inference" => Self::Inference(payload(tag, frame)),
            "scenario" => Self::Scenario(payload(tag, frame)),
            "report" | "report-section" | "report_section" => {
                Self::ReportSection(payload(tag, frame))
            }
            "error" => Self::Error,
            "done" => Self::Done(payload(tag, frame)),
            "heartbeat" => Self::Heartbeat,
            other => Self::Unknown(other.to_string()),
        }
    }

    fn payload_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::DocumentBatch(p) => serde_json::to_value(p),
            Self::Reasoning(p) => serde_json::to_value(p),
            Self::Correlation(p) => serde_json::to_value(p),
            Self::Hypothesis(p) => serde_json::to_value(p),
            Self::Evidence(p) => serde_json::to_value(p),
            Self::Inference(p) => serde_json::to_value(p),
            Self::Scenario(p) => serde_json::to_value(p),
            Self::ReportSection(p) => serde_json::to_value(p),
            Self::Done(p) => serde_json::to_value(p),
            Self::Thinking
            | Self::SearchingProgress
            | Self::Error
            | Self::Heartbeat
            | Self::Unknown(_) => Ok(Value::Object(Map::new())),
        }
    }
}

/// One server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Originating agent (`supervisor`, `region_EU`, ...).
    pub agent: Option<String>,
    pub content: String,
    /// Backend timestamp, advisory only.
    pub timestamp: Option<String>,
    /// Overall pipeline progress (0-100), when the backend reports it.
    pub progress: Option<f64>,
    pub kind: EventKind,
}

#[derive(Default, Deserialize)]
struct Header {
    #[serde(default, alias = "agentId", alias = "agent_id", deserialize_with = "lenient")]
    agent: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    content: String,
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    progress: Option<f64>,
}

impl Event {
    /// Create an event with empty common fields.
    #[must_use]
    pub const fn new(kind: EventKind) -> Self {
        Self {
            agent: None,
            content: String::new(),
            timestamp: None,
            progress: None,
            kind,
        }
    }

    /// Set the originating agent.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Set the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set the reported progress.
    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the backend timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Whether this event ends the stream (`done` or `error`).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done(_) | EventKind::Error)
    }

    /// Whether this is a keep-alive frame.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self.kind, EventKind::Heartbeat)
    }

    /// Decode one frame's data.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object with a string `type` tag.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(&value)
    }

    /// Decode an already parsed frame.
    ///
    /// # Errors
    /// Returns error if the value is not an object with a string `type` tag.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingKind)?;

        let header = Header::deserialize(value).unwrap_or_default();
        Ok(Self {
            agent: header.agent,
            content: header.content,
            timestamp: header.timestamp,
            progress: header.progress,
            kind: EventKind::decode(tag, value),
        })
    }

    /// Encode to the wire object.
    ///
    /// # Errors
    /// Returns error if a payload fails to serialize.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut object = match self.kind.payload_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("type".to_string(), Value::from(self.kind.tag()));
        if let Some(agent) = &self.agent {
            object.insert("agent".to_string(), Value::from(agent.as_str()));
        }
        object.insert("content".to_string(), Value::from(self.content.as_str()));
        if let Some(timestamp) = &self.timestamp {
            object.insert("timestamp".to_string(), Value::from(timestamp.as_str()));
        }
        if let Some(progress) = self.progress {
            object.insert("progress".to_string(), Value::from(progress));
        }
        Ok(Value::Object(object))
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn payload<T: DeserializeOwned + Default>(tag: &str, frame: &Value) -> T {
    T::deserialize(frame).unwrap_or_else(|e| {
        tracing::debug!(kind = tag, "payload shape mismatch, using defaults: {e}");
        T::default()
    })
}

fn unknown_source() -> String {
    "unknown".to_string()
}

/// Deserialize a field, falling back to its default on null or a type mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Deserialize a list, dropping elements that do not match.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let source: Option<String> = lenient(deserializer)?;
    Ok(source.filter(|s| !s.is_empty()).unwrap_or_else(unknown_source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_thinking() {
        let event = Event::decode(
            r#"{"type":"thinking","agent":"region_EU","content":"Reading sources","timestamp":"2025-03-01T10:00:00"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Thinking);
        assert_eq!(event.agent.as_deref(), Some("region_EU"));
        assert_eq!(event.content, "Reading sources");
        assert_eq!(event.timestamp.as_deref(), Some("2025-03-01T10:00:00"));
        assert!(event.progress.is_none());
    }

    #[test]
    fn test_decode_aliases() {
        let event = Event::decode(r#"{"type":"searching-progress","agentId":"supervisor","content":"x","progress":40}"#).unwrap();
        assert_eq!(event.kind, EventKind::SearchingProgress);
        assert_eq!(event.agent.as_deref(), Some("supervisor"));
        assert_eq!(event.progress, Some(40.0));

        let event = Event::decode(r#"{"type":"report-section","content":"body","section":"economy"}"#).unwrap();
        assert_eq!(
            event.kind,
            EventKind::ReportSection(ReportSection {
                section: Some("economy".to_string())
            })
        );
    }

    #[test]
    fn test_unknown_kind_is_accepted() {
        let event = Event::decode(r#"{"type":"telemetry","content":"cpu"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("telemetry".to_string()));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_decode_rejects_non_events() {
        assert!(matches!(Event::decode("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(Event::decode("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            Event::decode(r#"{"content":"no tag"}"#),
            Err(DecodeError::MissingKind)
        ));
        assert!(matches!(
            Event::decode(r#"{"type":7}"#),
            Err(DecodeError::MissingKind)
        ));
    }

    #[test]
    fn test_wrong_field_types_fall_back_to_defaults() {
        let event = Event::decode(
            r#"{"type":"document","agent":42,"content":null,"progress":"half","docs":"none"}"#,
        )
        .unwrap();
        assert!(event.agent.is_none());
        assert_eq!(event.content, "");
        assert!(event.progress.is_none());
        assert_eq!(event.kind, EventKind::DocumentBatch(DocumentBatch::default()));
    }

    #[test]
    fn test_bad_documents_are_skipped() {
        let frame = json!({
            "type": "document",
            "content": "Found 3 documents",
            "docs": [
                {"title": "NATO summit", "relevance": 0.9, "source": "NATO", "credibility": "high"},
                "garbage",
                {"title": "Trade memo", "relevance": 0.4, "url": "https://example.org/memo",
                 "credibility": {"level": "suspicious", "score": 0.2}}
            ]
        });
        let event = Event::from_value(&frame).unwrap();
        let EventKind::DocumentBatch(batch) = event.kind else {
            panic!("expected document batch");
        };
        assert_eq!(batch.docs.len(), 2);
        assert_eq!(
            batch.docs[0].credibility,
            Some(Credibility {
                level: CredibilityLevel::High,
                score: None
            })
        );
        assert_eq!(batch.docs[1].source, "unknown");
        assert_eq!(
            batch.docs[1].credibility.as_ref().map(|c| c.level),
            Some(CredibilityLevel::Suspicious)
        );
    }

    #[test]
    fn test_unrecognized_scenario_fields_are_dropped() {
        let event = Event::decode(
            r#"{"type":"scenario","timeframe":"24m","variant":"negative","confidence":0.7,"content":"..."}"#,
        )
        .unwrap();
        let EventKind::Scenario(scenario) = event.kind else {
            panic!("expected scenario");
        };
        assert!(scenario.timeframe.is_none());
        assert_eq!(scenario.variant, Some(Variant::Negative));
        assert_eq!(scenario.confidence, Some(0.7));
    }

    #[test]
    fn test_encode_inference_frame() {
        let event = Event::new(EventKind::Inference(Inference {
            facts: vec![FactUnit {
                content: "Gas storage at 60%".to_string(),
                ..FactUnit::default()
            }],
            chain: vec!["Low storage".to_string(), "Price pressure".to_string()],
            prediction: "Winter price spike".to_string(),
            horizon: Some("12m".to_string()),
            assumptions: vec!["No new pipeline".to_string()],
            confidence: Some(0.6),
        }))
        .with_agent("sector_energy")
        .with_progress(70.0);

        let value = event.to_value().unwrap();
        assert_eq!(value["type"], "inference");
        assert_eq!(value["agent"], "sector_energy");
        assert_eq!(value["prediction"], "Winter price spike");
        assert_eq!(value["assumptions"][0], "No new pipeline");

        let decoded: Event = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(Event::new(EventKind::Error).is_terminal());
        assert!(Event::new(EventKind::Done(Done::default())).is_terminal());
        assert!(!Event::new(EventKind::Heartbeat).is_terminal());
        assert!(Event::new(EventKind::Heartbeat).is_heartbeat());
    }
}
