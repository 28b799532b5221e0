//! Core traits for the backend, the event sink and persistence.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::Event;
use crate::request::{AnalyzeRequest, AnalyzeResponse};

/// Backend-assigned session identifier.
pub type SessionId = String;

/// Raw body chunks of an event stream.
pub type FrameStream = BoxStream<'static, Result<Bytes, StreamFault>>;

/// Triggering request failed before a session id was obtained.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("Request rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RequestError {
    /// HTTP status, when the backend answered.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(_) | Self::InvalidResponse(_) => None,
        }
    }
}

/// Connection-level failure after attaching to a stream.
#[derive(Debug, Clone, Error)]
pub enum StreamFault {
    #[error("Failed to open stream: {0}")]
    Connect(#[from] RequestError),
    #[error("Connection lost: {0}")]
    Network(String),
    #[error("Stream ended before a terminal event")]
    Ended,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for analysis backends.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Submit an analysis and wait for the session acknowledgement.
    async fn open(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, RequestError>;

    /// Open the event stream of an acknowledged session.
    async fn stream(&self, session_id: &str) -> Result<FrameStream, RequestError>;
}

/// Receiver of decoded stream events.
///
/// Calls arrive in stream order from a single task. Implementations must not
/// call back into the transport that delivers to them.
pub trait EventSink: Send + Sync {
    /// A decoded, non-heartbeat event.
    fn on_event(&self, event: Event);

    /// The stream failed. Called at most once, and nothing follows it.
    fn on_error(&self, fault: StreamFault);
}

/// Message form of the two sink callbacks.
#[derive(Debug, Clone)]
pub enum StreamSignal {
    Event(Event),
    Fault(StreamFault),
}

impl EventSink for mpsc::UnboundedSender<StreamSignal> {
    fn on_event(&self, event: Event) {
        let _ = self.send(StreamSignal::Event(event));
    }

    fn on_error(&self, fault: StreamFault) {
        let _ = self.send(StreamSignal::Fault(fault));
    }
}

/// Durable string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
