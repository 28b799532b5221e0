//! File-backed key-value store: one JSON document per key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sedno_core::config::HistorySettings;
use sedno_core::{KeyValueStore, StorageError};

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash never leaves a half-written document.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a store in the configured history directory.
    ///
    /// # Errors
    /// Returns error if no directory is configured and the platform has no
    /// data directory.
    pub fn from_settings(settings: &HistorySettings) -> Result<Self, StorageError> {
        settings
            .resolved_dir()
            .map(Self::new)
            .ok_or_else(|| StorageError::Internal("no data directory available".to_string()))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::Internal(format!("invalid key: {key}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), bytes = value.len(), "Wrote store file");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStatus, HistoryStore, NewHistoryEntry};

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get("sedno_analysis_history").await.unwrap(), None);
        store.set("sedno_analysis_history", "[]").await.unwrap();
        assert_eq!(
            store.get("sedno_analysis_history").await.unwrap().as_deref(),
            Some("[]")
        );
        assert!(dir.path().join("nested/sedno_analysis_history.json").exists());
        assert!(!dir.path().join("nested/sedno_analysis_history.json.tmp").exists());

        store.remove("sedno_analysis_history").await.unwrap();
        store.remove("sedno_analysis_history").await.unwrap();
        assert_eq!(store.get("sedno_analysis_history").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(store.set(key, "x").await, Err(StorageError::Internal(_))));
        }
    }

    #[tokio::test]
    async fn test_history_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = HistoryStore::load(FileStore::new(dir.path()), "history", 50).await;
        let saved = store
            .save(NewHistoryEntry {
                query: "Energy security in the Baltics".to_string(),
                config: sedno_core::AnalysisConfig::new().with_country("LTU"),
                scenarios: Vec::new(),
                steps: Vec::new(),
                status: HistoryStatus::Completed,
            })
            .await;
        drop(store);

        let reopened = HistoryStore::load(FileStore::new(dir.path()), "history", 50).await;
        assert_eq!(reopened.list().await, vec![saved]);
    }

    #[test]
    fn test_from_settings_uses_configured_dir() {
        let settings = HistorySettings {
            dir: Some(PathBuf::from("/var/lib/sedno")),
            ..HistorySettings::default()
        };
        let store = FileStore::from_settings(&settings).unwrap();
        assert_eq!(store.dir(), Path::new("/var/lib/sedno"));
    }
}
