//! Session coordinator: one active analysis at a time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sedno_core::config::SessionSettings;
use sedno_core::{
    AnalysisBackend, AnalysisConfig, AnalyzeRequest, Event, EventSink, KeyValueStore,
    ProgressEstimate, RequestError, SessionId, StreamFault,
};
use sedno_transport::TransportAdapter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::history::{HistoryEntry, HistoryStatus, HistoryStore, NewHistoryEntry};
use crate::reducer::{Reduction, SessionReducer};
use crate::state::{SessionPhase, SessionState};

struct Shared {
    reducer: Mutex<SessionReducer>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn reset_reducer(&self, report_preview_chars: usize) {
        *self.reducer.lock().unwrap_or_else(PoisonError::into_inner) =
            SessionReducer::new(report_preview_chars);
    }
}

/// Feeds transport callbacks into the reducer.
struct ReducerSink {
    shared: Arc<Shared>,
}

impl EventSink for ReducerSink {
    fn on_event(&self, event: Event) {
        let mut reducer = self.shared.reducer.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared
            .state
            .send_if_modified(|state| reducer.apply(state, event) != Reduction::Ignored);
    }

    fn on_error(&self, fault: StreamFault) {
        let mut reducer = self.shared.reducer.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.state.send_if_modified(|state| {
            let before = state.phase;
            reducer.fail(state, &fault);
            state.phase != before
        });
    }
}

/// Drives one analysis session at a time over an [`AnalysisBackend`].
///
/// State is published through a `watch` channel: readers always see a
/// consistent snapshot. Starting a new session discards the previous one.
pub struct SessionCoordinator<B: ?Sized> {
    transport: TransportAdapter<B>,
    shared: Arc<Shared>,
    progress: Arc<watch::Sender<Option<ProgressEstimate>>>,
    ticker: Option<JoinHandle<()>>,
    settings: SessionSettings,
    committed: bool,
}

impl<B> SessionCoordinator<B>
where
    B: AnalysisBackend + ?Sized + 'static,
{
    #[must_use]
    pub fn new(backend: Arc<B>, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (progress, _) = watch::channel(None);
        Self {
            transport: TransportAdapter::new(backend),
            shared: Arc::new(Shared {
                reducer: Mutex::new(SessionReducer::new(settings.report_preview_chars)),
                state,
            }),
            progress: Arc::new(progress),
            ticker: None,
            settings,
            committed: false,
        }
    }

    /// Start an analysis. Any running session is closed and discarded.
    ///
    /// Returns once the backend acknowledged the request; events then flow
    /// into the published state in the background.
    ///
    /// # Errors
    /// Returns error if the backend rejects the request or cannot be reached.
    /// The published state is then `Failed` with the error message and no
    /// session id.
    pub async fn start_session(
        &mut self,
        query: &str,
        config: &AnalysisConfig,
    ) -> Result<SessionId, RequestError> {
        self.halt();
        let started = Instant::now();
        self.shared.reset_reducer(self.settings.report_preview_chars);
        self.shared
            .state
            .send_replace(SessionState::starting(query, config.clone()));
        self.progress.send_replace(None);
        self.committed = false;

        let request = AnalyzeRequest::new(query, config);
        let session_id = match self.transport.open(&request).await {
            Ok(session_id) => session_id,
            Err(e) => {
                tracing::error!("Failed to start analysis: {e}");
                self.shared.state.send_modify(|state| {
                    state.phase = SessionPhase::Failed;
                    state.error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        self.shared.state.send_modify(|state| {
            state.session_id = Some(session_id.clone());
            state.phase = SessionPhase::Streaming;
        });
        self.ticker = Some(spawn_ticker(
            self.shared.state.subscribe(),
            Arc::clone(&self.progress),
            started,
            self.settings.tick_interval(),
        ));
        self.transport.attach(
            session_id.clone(),
            Arc::new(ReducerSink {
                shared: Arc::clone(&self.shared),
            }),
        );

        Ok(session_id)
    }

    /// Cancel the running session. Reduced state is kept.
    pub fn stop(&mut self) {
        self.halt();
        let mut reducer = self.shared.reducer.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.state.send_if_modified(|state| {
            let before = state.phase;
            reducer.stop(state);
            state.phase != before
        });
        tracing::info!("Analysis stopped");
    }

    /// Stop and reset to an empty, idle state.
    pub fn clear(&mut self) {
        self.halt();
        self.shared.reset_reducer(self.settings.report_preview_chars);
        self.shared.state.send_replace(SessionState::default());
        self.progress.send_replace(None);
        self.committed = false;
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver of state updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// State updates as a stream, starting with the current state.
    #[must_use]
    pub fn updates(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.shared.state.subscribe())
    }

    /// Receiver of the latest progress estimate.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<ProgressEstimate>> {
        self.progress.subscribe()
    }

    /// Wait until the session is no longer starting or streaming.
    pub async fn finished(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `self`, so this only fails if it is dropped.
        let _ = rx.wait_for(|state| !state.phase.is_active()).await;
        self.snapshot()
    }

    /// Save the finished session to `history`.
    ///
    /// Only a completed session with at least one scenario is saved, and
    /// only once. Returns the saved entry.
    pub async fn commit<S: KeyValueStore>(&mut self, history: &HistoryStore<S>) -> Option<HistoryEntry> {
        if self.committed {
            return None;
        }
        let state = self.snapshot();
        if state.phase != SessionPhase::Completed || state.scenarios.is_empty() {
            tracing::debug!(phase = ?state.phase, scenarios = state.scenarios.len(), "Nothing to commit");
            return None;
        }

        let entry = history
            .save(NewHistoryEntry {
                query: state.query,
                config: state.config,
                scenarios: state.scenarios,
                steps: state.steps,
                status: HistoryStatus::Completed,
            })
            .await;
        self.committed = true;
        Some(entry)
    }

    fn halt(&mut self) {
        self.transport.close();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl<B: ?Sized> Drop for SessionCoordinator<B> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Publish an estimate every `interval` until the session is terminal, then
/// publish a final one and stop.
fn spawn_ticker(
    mut state: watch::Receiver<SessionState>,
    progress: Arc<watch::Sender<Option<ProgressEstimate>>>,
    started: Instant,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let changed = tokio::select! {
                _ = ticker.tick() => false,
                result = state.changed() => {
                    if result.is_err() {
                        break;
                    }
                    true
                }
            };

            let (current, terminal) = {
                let snapshot = state.borrow_and_update();
                (snapshot.progress, snapshot.is_terminal())
            };
            if changed && !terminal {
                continue;
            }
            progress.send_replace(Some(ProgressEstimate::compute(started, Instant::now(), current)));
            if terminal {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use sedno_core::event::{Done, ScenarioPayload};
    use sedno_core::{EventKind, StepStatus, Timeframe, Variant};
    use sedno_transport::ScriptedBackend;

    use super::*;
    use crate::storage::MemoryStore;

    fn settings() -> SessionSettings {
        SessionSettings {
            tick_interval_ms: 10,
            ..SessionSettings::default()
        }
    }

    fn scenario() -> Event {
        Event::new(EventKind::Scenario(ScenarioPayload {
            timeframe: Some(Timeframe::ThirtySixMonths),
            variant: Some(Variant::Negative),
            confidence: Some(0.6),
            ..ScenarioPayload::default()
        }))
        .with_content("Full report")
    }

    fn complete_run() -> ScriptedBackend {
        ScriptedBackend::new("sess-1")
            .with_event(&Event::new(EventKind::Thinking).with_agent("supervisor"))
            .with_event(&Event::new(EventKind::SearchingProgress).with_agent("region_EU").with_progress(50.0))
            .with_event(&scenario())
            .with_event(&Event::new(EventKind::Done(Done::default())))
    }

    async fn finished_within(coordinator: &SessionCoordinator<ScriptedBackend>) -> SessionState {
        tokio::time::timeout(Duration::from_secs(5), coordinator.finished())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_session_and_commit_once() {
        let backend = Arc::new(complete_run());
        let mut coordinator = SessionCoordinator::new(Arc::clone(&backend), settings());

        let session_id = coordinator
            .start_session("Energy outlook", &AnalysisConfig::new().with_region("europe"))
            .await
            .unwrap();
        assert_eq!(session_id, "sess-1");

        let state = finished_within(&coordinator).await;
        assert_eq!(state.phase, SessionPhase::Completed);
        assert_eq!(state.session_id.as_deref(), Some("sess-1"));
        assert_eq!(state.steps.len(), 3);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Complete));
        assert_eq!(state.scenarios.len(), 1);
        assert!((state.progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(backend.requests()[0].regions, vec!["europe".to_string()]);

        let history = HistoryStore::load(MemoryStore::new(), "history", 50).await;
        let entry = coordinator.commit(&history).await.unwrap();
        assert_eq!(entry.query, "Energy outlook");
        assert_eq!(entry.status, HistoryStatus::Completed);
        assert!(coordinator.commit(&history).await.is_none());
        assert_eq!(history.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_start_creates_no_session() {
        let backend = Arc::new(ScriptedBackend::new("sess-1").rejecting(RequestError::Status {
            status: 422,
            body: "query too short".to_string(),
        }));
        let mut coordinator = SessionCoordinator::new(backend, settings());

        let err = tokio_test::assert_err!(coordinator.start_session("x", &AnalysisConfig::new()).await);
        assert_eq!(err.status_code(), Some(422));

        let state = coordinator.snapshot();
        assert_eq!(state.phase, SessionPhase::Failed);
        assert!(state.session_id.is_none());
        assert!(state.error.unwrap().contains("query too short"));
    }

    #[tokio::test]
    async fn test_stream_fault_fails_session() {
        let backend = Arc::new(
            ScriptedBackend::new("sess-1")
                .with_event(&Event::new(EventKind::Thinking).with_agent("supervisor"))
                .with_fault(StreamFault::Network("connection reset".to_string())),
        );
        let mut coordinator = SessionCoordinator::new(backend, settings());
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();

        let state = finished_within(&coordinator).await;
        assert_eq!(state.phase, SessionPhase::Failed);
        assert!(state.error.unwrap().contains("connection reset"));
        assert_eq!(state.steps.len(), 1);

        let history = HistoryStore::load(MemoryStore::new(), "history", 50).await;
        assert!(coordinator.commit(&history).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_and_clear() {
        let backend = Arc::new(
            ScriptedBackend::new("sess-1")
                .with_event(&Event::new(EventKind::Thinking).with_agent("supervisor"))
                .held_open(),
        );
        let mut coordinator = SessionCoordinator::new(backend, settings());
        let mut rx = coordinator.subscribe();
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.steps.len() == 1))
            .await
            .unwrap()
            .unwrap();

        coordinator.stop();
        let state = coordinator.snapshot();
        assert_eq!(state.phase, SessionPhase::Stopped);
        assert!(state.error.is_none());
        assert_eq!(state.steps.len(), 1);

        coordinator.clear();
        assert_eq!(coordinator.snapshot(), SessionState::default());
        assert!(coordinator.progress().borrow().is_none());
    }

    #[tokio::test]
    async fn test_restart_discards_previous_session() {
        let backend = Arc::new(
            ScriptedBackend::new("sess-1")
                .with_event(&Event::new(EventKind::Thinking).with_agent("supervisor"))
                .held_open(),
        );
        let mut coordinator = SessionCoordinator::new(backend, settings());
        let mut rx = coordinator.subscribe();

        coordinator.start_session("first", &AnalysisConfig::new()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.steps.len() == 1))
            .await
            .unwrap()
            .unwrap();

        coordinator.start_session("second", &AnalysisConfig::new()).await.unwrap();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.query == "second" && s.steps.len() == 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert_eq!(state.steps[0].id, 1);
        assert_eq!(state.phase, SessionPhase::Streaming);
    }

    #[tokio::test]
    async fn test_progress_estimate_published() {
        let backend = Arc::new(
            ScriptedBackend::new("sess-1")
                .with_event(&Event::new(EventKind::SearchingProgress).with_progress(50.0))
                .held_open(),
        );
        let mut coordinator = SessionCoordinator::new(backend, settings());
        let mut progress = coordinator.progress();
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();

        let estimate = *tokio::time::timeout(
            Duration::from_secs(5),
            progress.wait_for(|e| e.is_some_and(|e| e.progress >= 50.0)),
        )
        .await
        .unwrap()
        .unwrap();

        let estimate = estimate.unwrap();

        assert!(estimate.remaining.is_some());
        coordinator.stop();
    }

    #[tokio::test]
    async fn test_final_estimate_is_frozen() {
        let mut coordinator = SessionCoordinator::new(Arc::new(complete_run()), settings());
        let mut progress = coordinator.progress();
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();
        finished_within(&coordinator).await;

        let last = *tokio::time::timeout(
            Duration::from_secs(5),
            progress.wait_for(|e| e.is_some_and(|e| e.progress >= 100.0)),
        )
        .await
        .unwrap()
        .unwrap();
        let last = last.unwrap();
        assert!(last.remaining.is_none());

        // Several tick intervals.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!progress.has_changed().unwrap());
        assert_eq!(*progress.borrow(), Some(last));
    }

    #[tokio::test]
    async fn test_tiny_progress_keeps_ticker_alive() {
        let backend = Arc::new(
            ScriptedBackend::new("sess-1")
                .with_event(&Event::new(EventKind::SearchingProgress).with_progress(1e-300))
                .held_open(),
        );
        let mut coordinator = SessionCoordinator::new(backend, settings());
        let mut progress = coordinator.progress();
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();

        let estimate = *tokio::time::timeout(
            Duration::from_secs(5),
            progress.wait_for(|e| e.is_some_and(|e| e.progress > 0.0)),
        )
        .await
        .unwrap()
        .unwrap();
        let first = estimate.unwrap();
        assert!(first.remaining.is_none());

        // Later ticks still arrive.
        tokio::time::timeout(
            Duration::from_secs(5),
            progress.wait_for(|e| e.is_some_and(|e| e.elapsed > first.elapsed)),
        )
        .await
        .unwrap()
        .unwrap();
        coordinator.stop();
    }

    #[tokio::test]
    async fn test_commit_requires_scenarios() {
        let backend = Arc::new(ScriptedBackend::new("sess-1").with_event(&Event::new(EventKind::Done(Done::default()))));
        let mut coordinator = SessionCoordinator::new(backend, settings());
        coordinator.start_session("q", &AnalysisConfig::new()).await.unwrap();

        let state = finished_within(&coordinator).await;
        assert_eq!(state.phase, SessionPhase::Completed);

        let history = HistoryStore::load(MemoryStore::new(), "history", 50).await;
        assert!(coordinator.commit(&history).await.is_none());
        assert!(history.list().await.is_empty());
    }
}
