//! Folds stream events into a [`SessionState`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sedno_core::event::{
    Correlation, DocumentBatch, Document, Evidence, FactUnit, Hypothesis, Inference, ReasoningChain,
    ReportSection, ScenarioPayload,
};
use sedno_core::step::{StepPayload, agent_display_name, parse_timestamp};
use sedno_core::{
    AgentType, Event, EventKind, ReasoningStep, ScenarioArtifact, StepKind, StepStatus, StreamFault,
};

use crate::state::{SessionPhase, SessionState};

const DEFAULT_SCENARIO_CONFIDENCE: f64 = 0.5;

/// What a single event did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// A step with this id was appended.
    Step(u64),
    /// A scenario artifact was appended.
    Scenario,
    /// Nothing changed.
    Ignored,
}

/// Per-session reducer.
///
/// Paired with exactly one [`SessionState`]; a new session needs a new
/// reducer. Every event is folded synchronously, so the trace order equals
/// the order events were applied in.
#[derive(Debug)]
pub struct SessionReducer {
    next_step_id: u64,
    /// Agent id -> index of its open step. At most one per agent.
    open_steps: HashMap<String, usize>,
    report_preview_chars: usize,
}

struct StepDraft {
    agent: String,
    agent_type: AgentType,
    status: StepStatus,
    kind: StepKind,
    title: String,
    content: String,
    documents: Vec<Document>,
    facts: Vec<FactUnit>,
    payload: Option<StepPayload>,
}

impl StepDraft {
    fn new(agent: String, agent_type: AgentType, status: StepStatus, title: String, content: String) -> Self {
        Self {
            agent,
            agent_type,
            status,
            kind: StepKind::Plain,
            title,
            content,
            documents: Vec::new(),
            facts: Vec::new(),
            payload: None,
        }
    }

    fn analytic(agent: Option<String>, kind: StepKind, status: StepStatus, title: &str, content: String) -> Self {
        let agent_type = AgentType::classify(agent.as_deref());
        let mut draft = Self::new(
            agent.unwrap_or_else(|| "system".to_string()),
            agent_type,
            status,
            title.to_string(),
            content,
        );
        draft.kind = kind;
        draft
    }
}

impl SessionReducer {
    #[must_use]
    pub fn new(report_preview_chars: usize) -> Self {
        Self {
            next_step_id: 1,
            open_steps: HashMap::new(),
            report_preview_chars,
        }
    }

    /// Fold one event into `state`.
    ///
    /// Once the state is terminal every event is ignored.
    pub fn apply(&mut self, state: &mut SessionState, event: Event) -> Reduction {
        if state.is_terminal() {
            tracing::trace!(kind = event.kind.tag(), "Ignoring event after terminal state");
            return Reduction::Ignored;
        }

        match &event.kind {
            EventKind::Heartbeat => return Reduction::Ignored,
            EventKind::Unknown(tag) => {
                tracing::debug!(tag = %tag, "Ignoring unknown event kind");
                return Reduction::Ignored;
            }
            _ => {}
        }

        if let Some(progress) = event.progress {
            raise_progress(state, progress);
        }

        let Event {
            agent,
            content,
            timestamp,
            kind,
            ..
        } = event;
        let timestamp = timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let draft = match kind {
            EventKind::Heartbeat | EventKind::Unknown(_) => return Reduction::Ignored,
            EventKind::Scenario(payload) => {
                state.scenarios.push(scenario_artifact(payload, content));
                return Reduction::Scenario;
            }
            EventKind::Done(_) => {
                state.progress = 100.0;
                self.complete_open_steps(state);
                let id = self.append(
                    state,
                    StepDraft::new(
                        "system".to_string(),
                        AgentType::Orchestrator,
                        StepStatus::Complete,
                        "Analysis complete".to_string(),
                        "All scenarios have been generated.".to_string(),
                    ),
                    timestamp,
                );
                state.phase = SessionPhase::Completed;
                tracing::info!(session_id = ?state.session_id, steps = state.steps.len(), "Session completed");
                return Reduction::Step(id);
            }
            EventKind::Error => {
                let message = non_empty(content, || "An error occurred".to_string());
                let id = self.append(
                    state,
                    StepDraft::new(
                        agent.unwrap_or_else(|| "system".to_string()),
                        AgentType::Orchestrator,
                        StepStatus::Error,
                        "Error".to_string(),
                        message.clone(),
                    ),
                    timestamp,
                );
                tracing::warn!(session_id = ?state.session_id, "Backend reported error: {message}");
                state.error = Some(message);
                state.phase = SessionPhase::Failed;
                return Reduction::Step(id);
            }
            EventKind::Thinking => {
                let agent_type = AgentType::classify(agent.as_deref());
                let title = agent_display_name(agent.as_deref());
                StepDraft::new(
                    agent.unwrap_or_else(|| "unknown".to_string()),
                    agent_type,
                    StepStatus::Thinking,
                    title,
                    content,
                )
            }
            EventKind::SearchingProgress => {
                let agent_type = AgentType::classify(agent.as_deref());
                let title = agent_display_name(agent.as_deref());
                StepDraft::new(
                    agent.unwrap_or_else(|| "system".to_string()),
                    agent_type,
                    StepStatus::Searching,
                    title,
                    non_empty(content, || "Processing...".to_string()),
                )
            }
            EventKind::DocumentBatch(batch) => document_step(agent, content, batch),
            EventKind::ReportSection(section) => self.report_step(&content, section),
            EventKind::Reasoning(chain) => reasoning_step(agent, content, chain),
            EventKind::Correlation(pair) => correlation_step(agent, content, pair),
            EventKind::Hypothesis(hypothesis) => hypothesis_step(agent, content, hypothesis),
            EventKind::Evidence(evidence) => evidence_step(agent, content, evidence),
            EventKind::Inference(inference) => inference_step(agent, content, inference),
        };

        Reduction::Step(self.append(state, draft, timestamp))
    }

    /// Mark the session failed after a connection-level fault.
    pub fn fail(&mut self, state: &mut SessionState, fault: &StreamFault) {
        if state.is_terminal() {
            return;
        }
        state.error = Some(fault.to_string());
        state.phase = SessionPhase::Failed;
    }

    /// Mark an active session as cancelled by the caller.
    pub fn stop(&mut self, state: &mut SessionState) {
        if state.phase.is_active() {
            state.phase = SessionPhase::Stopped;
        }
    }

    fn append(&mut self, state: &mut SessionState, draft: StepDraft, timestamp: DateTime<Utc>) -> u64 {
        // An agent's earlier step is finished once it speaks again.
        if let Some(index) = self.open_steps.remove(&draft.agent) {
            if let Some(step) = state.steps.get_mut(index) {
                if step.status.is_open() {
                    step.status = StepStatus::Complete;
                }
            }
        }

        let id = self.next_step_id;
        self.next_step_id += 1;
        if draft.status.is_open() {
            self.open_steps.insert(draft.agent.clone(), state.steps.len());
        }

        state.steps.push(ReasoningStep {
            id,
            agent: draft.agent,
            agent_type: draft.agent_type,
            status: draft.status,
            kind: draft.kind,
            title: draft.title,
            content: draft.content,
            documents: draft.documents,
            facts: draft.facts,
            payload: draft.payload,
            timestamp,
        });
        id
    }

    fn complete_open_steps(&mut self, state: &mut SessionState) {
        for (_, index) in self.open_steps.drain() {
            if let Some(step) = state.steps.get_mut(index) {
                if step.status.is_open() {
                    step.status = StepStatus::Complete;
                }
            }
        }
    }

    fn report_step(&self, content: &str, section: ReportSection) -> StepDraft {
        let title = format!("Report: {}", section.section.as_deref().unwrap_or("Section"));
        StepDraft::new(
            "synthesis".to_string(),
            AgentType::Synthesis,
            StepStatus::Complete,
            title,
            preview(content, self.report_preview_chars),
        )
    }
}

fn raise_progress(state: &mut SessionState, progress: f64) {
    if !progress.is_finite() {
        return;
    }
    let progress = progress.clamp(0.0, 100.0);
    if progress > state.progress {
        state.progress = progress;
    }
}

fn non_empty(content: String, fallback: impl FnOnce() -> String) -> String {
    if content.trim().is_empty() {
        fallback()
    } else {
        content
    }
}

/// First `max_chars` characters, with `...` appended when cut.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn scenario_artifact(payload: ScenarioPayload, content: String) -> ScenarioArtifact {
    let confidence = payload
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_SCENARIO_CONFIDENCE)
        .clamp(0.0, 1.0);
    ScenarioArtifact {
        timeframe: payload.timeframe.unwrap_or_default(),
        variant: payload.variant.unwrap_or_default(),
        title: payload
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| "Scenario".to_string()),
        content,
        confidence,
        chart: payload.chart,
    }
}

fn document_step(agent: Option<String>, content: String, batch: DocumentBatch) -> StepDraft {
    let count = batch.docs.len();
    let mut draft = StepDraft::new(
        agent.unwrap_or_else(|| "search".to_string()),
        AgentType::Orchestrator,
        StepStatus::Complete,
        "Documents found".to_string(),
        non_empty(content, || format!("Retrieved {count} documents")),
    );
    draft.documents = batch.docs;
    draft
}

fn reasoning_step(agent: Option<String>, content: String, chain: ReasoningChain) -> StepDraft {
    let content = non_empty(content, || {
        chain
            .conclusion
            .clone()
            .unwrap_or_else(|| chain.steps.join(" -> "))
    });
    let mut draft = StepDraft::analytic(agent, StepKind::Reasoning, StepStatus::Analyzing, "Reasoning chain", content);
    draft.payload = Some(StepPayload::Reasoning(chain));
    draft
}

fn correlation_step(agent: Option<String>, content: String, pair: Correlation) -> StepDraft {
    let content = non_empty(content, || format!("{} <-> {}", pair.source, pair.target));
    let mut draft = StepDraft::analytic(agent, StepKind::Correlation, StepStatus::Complete, "Correlation", content);
    draft.payload = Some(StepPayload::Correlation(pair));
    draft
}

fn hypothesis_step(agent: Option<String>, content: String, hypothesis: Hypothesis) -> StepDraft {
    let content = non_empty(content, || hypothesis.statement.clone());
    let mut draft = StepDraft::analytic(agent, StepKind::Hypothesis, StepStatus::Complete, "Hypothesis", content);
    draft.payload = Some(StepPayload::Hypothesis(hypothesis));
    draft
}

fn evidence_step(agent: Option<String>, content: String, evidence: Evidence) -> StepDraft {
    let content = non_empty(content, || evidence.hypothesis.clone().unwrap_or_default());
    let mut draft = StepDraft::analytic(agent, StepKind::Evidence, StepStatus::Complete, "Evidence", content);
    draft.facts.clone_from(&evidence.facts);
    draft.payload = Some(StepPayload::Evidence(evidence));
    draft
}

fn inference_step(agent: Option<String>, content: String, inference: Inference) -> StepDraft {
    let content = non_empty(content, || inference.prediction.clone());
    let mut draft = StepDraft::analytic(agent, StepKind::Inference, StepStatus::Complete, "Inference", content);
    draft.facts.clone_from(&inference.facts);
    draft.payload = Some(StepPayload::Inference(inference));
    draft
}

#[cfg(test)]
mod tests {
    use sedno_core::event::Done;
    use sedno_core::{Timeframe, Variant};

    use super::*;

    fn reduce_all(events: Vec<Event>) -> SessionState {
        let mut reducer = SessionReducer::new(200);
        let mut state = SessionState::starting("q", sedno_core::AnalysisConfig::new());
        state.phase = SessionPhase::Streaming;
        for event in events {
            reducer.apply(&mut state, event);
        }
        state
    }

    fn thinking(agent: &str) -> Event {
        Event::new(EventKind::Thinking).with_agent(agent).with_content("...")
    }

    fn scenario(confidence: f64) -> Event {
        Event::new(EventKind::Scenario(ScenarioPayload {
            timeframe: Some(Timeframe::TwelveMonths),
            variant: Some(Variant::Positive),
            title: Some("Growth".to_string()),
            confidence: Some(confidence),
            chart: None,
        }))
        .with_content("Full report")
    }

    fn done() -> Event {
        Event::new(EventKind::Done(Done::default()))
    }

    fn error(message: &str) -> Event {
        Event::new(EventKind::Error).with_content(message)
    }

    #[test]
    fn test_same_agent_completes_previous_step() {
        let state = reduce_all(vec![thinking("agentA"), thinking("agentA")]);

        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[0].status, StepStatus::Complete);
        assert_eq!(state.steps[1].status, StepStatus::Thinking);
        assert_eq!(state.steps[0].id, 1);
        assert_eq!(state.steps[1].id, 2);
    }

    #[test]
    fn test_other_agents_stay_open() {
        let state = reduce_all(vec![thinking("region_EU"), thinking("country_DE"), thinking("region_EU")]);

        let statuses: Vec<StepStatus> = state.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Complete, StepStatus::Thinking, StepStatus::Thinking]
        );
        assert_eq!(state.steps[1].title, "Country: DE");
        assert_eq!(state.steps[1].agent_type, AgentType::Country);
    }

    #[test]
    fn test_duplicate_scenarios_are_appended() {
        let state = reduce_all(vec![scenario(0.8), scenario(0.4)]);

        assert!(state.steps.is_empty());
        assert_eq!(state.scenarios.len(), 2);
        assert_eq!(state.scenarios[0].key(), state.scenarios[1].key());
        let latest = state
            .latest_scenario(Timeframe::TwelveMonths, Variant::Positive)
            .unwrap();
        assert!((latest.confidence - 0.4).abs() < f64::EPSILON);
        assert!(state.latest_scenario(Timeframe::ThirtySixMonths, Variant::Negative).is_none());
    }

    #[test]
    fn test_scenario_defaults_and_clamping() {
        let state = reduce_all(vec![
            Event::new(EventKind::Scenario(ScenarioPayload::default())),
            scenario(3.0),
        ]);

        assert_eq!(state.scenarios[0].title, "Scenario");
        assert_eq!(state.scenarios[0].timeframe, Timeframe::TwelveMonths);
        assert_eq!(state.scenarios[0].variant, Variant::Positive);
        assert!((state.scenarios[0].confidence - 0.5).abs() < f64::EPSILON);
        assert!((state.scenarios[1].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_is_terminal() {
        let state = reduce_all(vec![thinking("supervisor"), error("LLM quota exceeded"), thinking("late"), done()]);

        assert_eq!(state.phase, SessionPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("LLM quota exceeded"));
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[1].status, StepStatus::Error);
        // Open steps of other agents keep their status.
        assert_eq!(state.steps[0].status, StepStatus::Thinking);
        assert!(state.progress < 100.0);
    }

    #[test]
    fn test_done_is_absorbing() {
        let mut reducer = SessionReducer::new(200);
        let mut state = SessionState::default();
        state.phase = SessionPhase::Streaming;

        reducer.apply(&mut state, thinking("region_EU"));
        assert!(matches!(reducer.apply(&mut state, done()), Reduction::Step(2)));
        assert_eq!(reducer.apply(&mut state, thinking("region_EU")), Reduction::Ignored);
        assert_eq!(reducer.apply(&mut state, error("late")), Reduction::Ignored);
        assert_eq!(reducer.apply(&mut state, done()), Reduction::Ignored);

        assert_eq!(state.phase, SessionPhase::Completed);
        assert!((state.progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.open_steps(), 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let state = reduce_all(vec![
            Event::new(EventKind::SearchingProgress).with_progress(40.0),
            Event::new(EventKind::SearchingProgress).with_progress(20.0),
            Event::new(EventKind::Thinking).with_progress(f64::NAN),
            Event::new(EventKind::Thinking).with_progress(f64::INFINITY),
            Event::new(EventKind::Thinking).with_progress(f64::NEG_INFINITY),
            Event::new(EventKind::Thinking),
        ]);
        assert!((state.progress - 40.0).abs() < f64::EPSILON);
        assert_eq!(state.steps[0].status, StepStatus::Complete);
        assert_eq!(state.steps[0].content, "Processing...");
        assert_eq!(state.steps[0].agent, "system");
    }

    #[test]
    fn test_unknown_and_heartbeat_leave_progress_alone() {
        let mut reducer = SessionReducer::new(200);
        let mut state = SessionState::starting("q", sedno_core::AnalysisConfig::new());
        state.phase = SessionPhase::Streaming;

        let reduction = reducer.apply(
            &mut state,
            Event::new(EventKind::Unknown("telemetry".to_string())).with_progress(60.0),
        );
        assert_eq!(reduction, Reduction::Ignored);
        let reduction = reducer.apply(&mut state, Event::new(EventKind::Heartbeat).with_progress(70.0));
        assert_eq!(reduction, Reduction::Ignored);

        assert!(state.progress.abs() < f64::EPSILON);
        assert!(state.steps.is_empty());
    }

    #[test]
    fn test_every_known_kind_but_scenario_appends_one_step() {
        let events = vec![
            Event::new(EventKind::Thinking),
            Event::new(EventKind::SearchingProgress),
            Event::new(EventKind::DocumentBatch(DocumentBatch::default())),
            Event::new(EventKind::Reasoning(ReasoningChain::default())),
            Event::new(EventKind::Correlation(Correlation::default())),
            Event::new(EventKind::Hypothesis(Hypothesis::default())),
            Event::new(EventKind::Evidence(Evidence::default())),
            Event::new(EventKind::Inference(Inference::default())),
            Event::new(EventKind::ReportSection(ReportSection::default())),
            scenario(0.7),
            Event::new(EventKind::Heartbeat),
            Event::new(EventKind::Unknown("telemetry".to_string())),
        ];
        let state = reduce_all(events);

        assert_eq!(state.steps.len(), 9);
        assert_eq!(state.scenarios.len(), 1);
        let ids: Vec<u64> = state.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=9).collect::<Vec<_>>());

        let kinds: Vec<StepKind> = state.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds[3], StepKind::Reasoning);
        assert_eq!(kinds[7], StepKind::Inference);
        assert_eq!(state.steps[3].status, StepStatus::Complete);
        assert_eq!(state.steps[2].content, "Retrieved 0 documents");
    }

    #[test]
    fn test_report_preview_truncates_on_char_boundary() {
        let long = "ż".repeat(250);
        let state = reduce_all(vec![
            Event::new(EventKind::ReportSection(ReportSection {
                section: Some("summary".to_string()),
            }))
            .with_content(long),
            Event::new(EventKind::ReportSection(ReportSection::default())).with_content("short"),
        ]);

        assert_eq!(state.steps[0].title, "Report: summary");
        assert_eq!(state.steps[0].content.chars().count(), 203);
        assert!(state.steps[0].content.ends_with("..."));
        assert_eq!(state.steps[1].title, "Report: Section");
        assert_eq!(state.steps[1].content, "short");
        assert_eq!(state.steps[1].agent_type, AgentType::Synthesis);
    }

    #[test]
    fn test_inference_keeps_full_path() {
        let inference = Inference {
            facts: vec![FactUnit {
                content: "Gas storage at 90%".to_string(),
                ..FactUnit::default()
            }],
            chain: vec!["storage high".to_string(), "prices ease".to_string()],
            prediction: "Lower winter prices".to_string(),
            horizon: Some("12m".to_string()),
            assumptions: vec!["mild winter".to_string()],
            confidence: Some(0.7),
        };
        let state = reduce_all(vec![Event::new(EventKind::Inference(inference.clone())).with_agent("synthesis")]);

        let step = &state.steps[0];
        assert_eq!(step.content, "Lower winter prices");
        assert_eq!(step.facts.len(), 1);
        assert_eq!(step.payload, Some(StepPayload::Inference(inference)));
        assert_eq!(step.agent_type, AgentType::Synthesis);
    }

    #[test]
    fn test_event_timestamp_is_used_when_valid() {
        let state = reduce_all(vec![
            thinking("a").with_timestamp("2024-05-01T10:00:00"),
            thinking("b").with_timestamp("yesterday"),
        ]);
        assert_eq!(state.steps[0].timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(state.steps[1].timestamp > state.steps[0].timestamp);
    }

    #[test]
    fn test_stream_fault_marks_failed_once() {
        let mut reducer = SessionReducer::new(200);
        let mut state = SessionState::default();
        state.phase = SessionPhase::Streaming;

        reducer.fail(&mut state, &StreamFault::Ended);
        reducer.fail(&mut state, &StreamFault::Network("later".to_string()));

        assert_eq!(state.phase, SessionPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("Stream ended before a terminal event"));
        assert!(state.steps.is_empty());
    }
}
