//! In-process backend that replays a fixed event stream.
//!
//! Used to replay recorded SSE transcripts and to drive sessions in tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use sedno_core::{
    AnalysisBackend, AnalyzeRequest, AnalyzeResponse, Event, FrameStream, RequestError,
    StreamFault,
};

/// Backend that acknowledges every request with one session id and streams
/// a prepared sequence of chunks.
#[derive(Debug)]
pub struct ScriptedBackend {
    session_id: String,
    reject: Option<RequestError>,
    chunks: Vec<Result<Bytes, StreamFault>>,
    hold_open: bool,
    requests: Mutex<Vec<AnalyzeRequest>>,
}

impl ScriptedBackend {
    /// Create a backend with an empty stream.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            reject: None,
            chunks: Vec::new(),
            hold_open: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay a recorded SSE transcript as a single chunk.
    #[must_use]
    pub fn from_transcript(session_id: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self::new(session_id).with_chunk(transcript.into())
    }

    /// Append an event as one `data:` frame.
    #[must_use]
    pub fn with_event(self, event: &Event) -> Self {
        match serde_json::to_string(event) {
            Ok(json) => self.with_chunk(format!("data: {json}\n\n")),
            Err(e) => {
                tracing::warn!("Skipping unencodable scripted event: {e}");
                self
            }
        }
    }

    /// Append a raw body chunk.
    #[must_use]
    pub fn with_chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.chunks.push(Ok(chunk.into()));
        self
    }

    /// Fail the stream at this point.
    #[must_use]
    pub fn with_fault(mut self, fault: StreamFault) -> Self {
        self.chunks.push(Err(fault));
        self
    }

    /// Keep the stream open after the last chunk instead of ending it.
    #[must_use]
    pub const fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Reject every analyze request.
    #[must_use]
    pub fn rejecting(mut self, error: RequestError) -> Self {
        self.reject = Some(error);
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<AnalyzeRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn open(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, RequestError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(error) = &self.reject {
            return Err(error.clone());
        }
        Ok(AnalyzeResponse {
            session_id: self.session_id.clone(),
            status: "started".to_string(),
            message: "Analysis started".to_string(),
        })
    }

    async fn stream(&self, _session_id: &str) -> Result<FrameStream, RequestError> {
        let chunks = stream::iter(self.chunks.clone());
        if self.hold_open {
            Ok(chunks.chain(stream::pending()).boxed())
        } else {
            Ok(chunks.boxed())
        }
    }
}
