//! Bounded, most-recent-first history of finished analyses.

use chrono::{DateTime, Utc};
use sedno_core::config::HistorySettings;
use sedno_core::{AnalysisConfig, KeyValueStore, ReasoningStep, ScenarioArtifact};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// How the analysis ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Completed,
    Error,
}

/// Snapshot to be saved; id and creation time are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub query: String,
    pub config: AnalysisConfig,
    pub scenarios: Vec<ScenarioArtifact>,
    pub steps: Vec<ReasoningStep>,
    pub status: HistoryStatus,
}

/// Saved, immutable analysis snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub query: String,
    pub config: AnalysisConfig,
    pub scenarios: Vec<ScenarioArtifact>,
    pub steps: Vec<ReasoningStep>,
    /// Serialized as an ISO-8601 string.
    pub created_at: DateTime<Utc>,
    pub status: HistoryStatus,
}

/// History collection persisted as one JSON array under a single key.
///
/// The in-memory collection is authoritative; persistence failures are
/// logged and never fail an operation.
pub struct HistoryStore<S> {
    storage: S,
    bucket: String,
    capacity: usize,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl<S: KeyValueStore> HistoryStore<S> {
    /// Load the collection stored under `bucket`.
    ///
    /// Missing, corrupt or non-array data yields an empty collection.
    pub async fn load(storage: S, bucket: impl Into<String>, capacity: usize) -> Self {
        let bucket = bucket.into();
        let capacity = capacity.max(1);
        let mut entries = match storage.get(&bucket).await {
            Ok(Some(raw)) => parse_entries(&bucket, &raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(bucket = %bucket, "Failed to read history: {e}");
                Vec::new()
            }
        };
        if entries.len() > capacity {
            tracing::debug!(bucket = %bucket, dropped = entries.len() - capacity, "Truncating over-full history");
            entries.truncate(capacity);
        }

        Self {
            storage,
            bucket,
            capacity,
            entries: Mutex::new(entries),
        }
    }

    /// Load using configured bucket and capacity.
    pub async fn with_settings(storage: S, settings: &HistorySettings) -> Self {
        Self::load(storage, settings.bucket.clone(), settings.capacity).await
    }

    /// Save a snapshot as the newest entry, evicting beyond capacity.
    pub async fn save(&self, entry: NewHistoryEntry) -> HistoryEntry {
        let saved = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            query: entry.query,
            config: entry.config,
            scenarios: entry.scenarios,
            steps: entry.steps,
            created_at: Utc::now(),
            status: entry.status,
        };

        let mut entries = self.entries.lock().await;
        entries.insert(0, saved.clone());
        entries.truncate(self.capacity);
        self.persist(&entries).await;
        tracing::info!(id = %saved.id, total = entries.len(), "Saved analysis to history");
        saved
    }

    /// Remove an entry. Unknown ids are ignored.
    pub async fn delete(&self, id: &str) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() != before {
            self.persist(&entries).await;
        }
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        if let Err(e) = self.storage.remove(&self.bucket).await {
            tracing::error!(bucket = %self.bucket, "Failed to clear history: {e}");
        }
    }

    /// All entries, newest first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<HistoryEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    async fn persist(&self, entries: &[HistoryEntry]) {
        let raw = match serde_json::to_string(entries) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to serialize history: {e}");
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.bucket, &raw).await {
            tracing::error!(bucket = %self.bucket, "Failed to persist history: {e}");
        }
    }
}

fn parse_entries(bucket: &str, raw: &str) -> Vec<HistoryEntry> {
    match serde_json::from_str::<Vec<HistoryEntry>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(bucket, "Discarding unreadable history: {e}");
            Vec::new()
        }
    }
}
