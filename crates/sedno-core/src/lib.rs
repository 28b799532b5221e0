//! Core abstractions for the sedno analysis client.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` - Typed wire events pushed by the analysis backend
//! - `ReasoningStep` / `ScenarioArtifact` - The reduced trace and report model
//! - `AnalyzeRequest` / `AnalysisConfig` - The session trigger payload
//! - `ProgressEstimate` - Elapsed / remaining time derivation
//! - `SednoConfig` - File + environment configuration
//! - Backend, storage and sink traits

pub mod config;
pub mod event;
pub mod progress;
pub mod request;
pub mod scenario;
pub mod step;
pub mod traits;

pub use config::SednoConfig;
pub use event::{DecodeError, Event, EventKind};
pub use progress::ProgressEstimate;
pub use request::{AnalysisConfig, AnalyzeRequest, AnalyzeResponse};
pub use scenario::{ScenarioArtifact, Timeframe, Variant};
pub use step::{AgentType, ReasoningStep, StepKind, StepStatus};
pub use traits::{
    AnalysisBackend, EventSink, FrameStream, KeyValueStore, RequestError, SessionId, StorageError,
    StreamFault, StreamSignal,
};
