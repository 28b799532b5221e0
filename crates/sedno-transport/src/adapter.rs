//! Session-scoped transport: open, attach, close.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use sedno_core::{
    AnalysisBackend, AnalyzeRequest, Event, EventSink, FrameStream, RequestError, SessionId,
    StreamFault,
};
use tokio::task::JoinHandle;

use crate::sse::{SseFrame, SseParser};

/// Serializes sink callbacks against `close`.
///
/// Callbacks run while the gate lock is held, so once `close` returns no
/// callback is in progress and none will start.
#[derive(Debug)]
struct DeliveryGate {
    open: Mutex<bool>,
}

impl DeliveryGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `deliver` if still open. Returns whether it ran.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            deliver();
        }
        *open
    }

    /// Run `deliver` if still open, then close.
    fn deliver_last(&self, deliver: impl FnOnce()) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            deliver();
            *open = false;
        }
    }

    fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// Drives one analysis session over an [`AnalysisBackend`].
///
/// `open` obtains a session id, `attach` starts delivering decoded events to
/// a sink, and `close` stops delivery. After a `done` or `error` event has
/// been delivered, the adapter closes itself.
pub struct TransportAdapter<B: ?Sized> {
    backend: Arc<B>,
    session_id: Option<SessionId>,
    gate: Option<Arc<DeliveryGate>>,
    reader: Option<JoinHandle<()>>,
}

impl<B> TransportAdapter<B>
where
    B: AnalysisBackend + ?Sized + 'static,
{
    #[must_use]
    pub const fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            session_id: None,
            gate: None,
            reader: None,
        }
    }

    /// Submit the analysis request and wait for its session id.
    ///
    /// Any previously attached stream is closed first.
    ///
    /// # Errors
    /// Returns error on network failure, a non-success status (with the
    /// response body), or an unparseable acknowledgement.
    pub async fn open(&mut self, request: &AnalyzeRequest) -> Result<SessionId, RequestError> {
        self.close();
        self.session_id = None;

        let response = self.backend.open(request).await?;
        if response.session_id.is_empty() {
            return Err(RequestError::InvalidResponse(
                "acknowledgement carried no session id".to_string(),
            ));
        }
        tracing::info!(session_id = %response.session_id, "Analysis session opened");
        self.session_id = Some(response.session_id.clone());
        Ok(response.session_id)
    }

    /// Start streaming events of `session_id` into `sink`.
    ///
    /// Must be called within a tokio runtime. A failure to open the stream
    /// is reported through `sink.on_error`.
    pub fn attach(&mut self, session_id: impl Into<SessionId>, sink: Arc<dyn EventSink>) {
        self.close();

        let session_id = session_id.into();
        let gate = Arc::new(DeliveryGate::new());
        let backend = Arc::clone(&self.backend);
        let task_gate = Arc::clone(&gate);
        let task_session = session_id.clone();

        let reader = tokio::spawn(async move {
            match backend.stream(&task_session).await {
                Ok(frames) => pump(&task_session, frames, sink.as_ref(), &task_gate).await,
                Err(e) => {
                    tracing::error!(session_id = %task_session, "Failed to open stream: {e}");
                    task_gate.deliver_last(|| sink.on_error(StreamFault::Connect(e)));
                }
            }
        });

        self.session_id = Some(session_id);
        self.gate = Some(gate);
        self.reader = Some(reader);
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.close();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
            tracing::debug!(session_id = ?self.session_id, "Transport closed");
        }
    }

    /// Session id from the last successful `open` or `attach`.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether events may still be delivered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.gate.as_ref().is_some_and(|gate| gate.is_open())
    }
}

impl<B: ?Sized> Drop for TransportAdapter<B> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.close();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn pump(session_id: &str, mut frames: FrameStream, sink: &dyn EventSink, gate: &DeliveryGate) {
    let mut parser = SseParser::new();

    while let Some(chunk) = frames.next().await {
        match chunk {
            Ok(bytes) => {
                for frame in parser.push_bytes(&bytes) {
                    if let Flow::Stop = dispatch(session_id, &frame, sink, gate) {
                        return;
                    }
                }
            }
            Err(fault) => {
                tracing::warn!(session_id, "Stream fault: {fault}");
                gate.deliver_last(|| sink.on_error(fault));
                return;
            }
        }
    }

    if let Some(frame) = parser.finish() {
        if let Flow::Stop = dispatch(session_id, &frame, sink, gate) {
            return;
        }
    }

    tracing::warn!(session_id, "Stream ended without a terminal event");
    gate.deliver_last(|| sink.on_error(StreamFault::Ended));
}

fn dispatch(session_id: &str, frame: &SseFrame, sink: &dyn EventSink, gate: &DeliveryGate) -> Flow {
    if frame.data.trim().is_empty() {
        return Flow::Continue;
    }

    let event = match Event::decode(&frame.data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(session_id, "Dropping undecodable frame: {e}");
            return Flow::Continue;
        }
    };

    if event.is_heartbeat() {
        tracing::trace!(session_id, "heartbeat");
        return Flow::Continue;
    }

    if event.is_terminal() {
        tracing::info!(session_id, kind = event.kind.tag(), "Terminal event received");
        gate.deliver_last(|| sink.on_event(event));
        return Flow::Stop;
    }

    if gate.deliver(|| sink.on_event(event)) {
        Flow::Continue
    } else {
        Flow::Stop
    }
}
