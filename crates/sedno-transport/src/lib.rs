//! Transport layer for sedno analysis sessions.
//!
//! Provides:
//! - Incremental SSE parsing
//! - `TransportAdapter`, the session-scoped open / attach / close driver
//! - HTTP backend (feature: http)
//! - `ScriptedBackend` for transcript replay

pub mod adapter;
pub mod scripted;
pub mod sse;

#[cfg(feature = "http")]
pub mod http;

pub use adapter::TransportAdapter;
pub use scripted::ScriptedBackend;
pub use sse::{SseFrame, SseParser};

#[cfg(feature = "http")]
pub use http::HttpBackend;
