//! Client configuration.
//!
//! Source order: explicit path > `$SEDNO_CONFIG` > `<config_dir>/sedno/config.toml`
//! > built-in defaults. Environment overrides are applied on top of whichever
//! source won.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default backend URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default history bucket name.
pub const DEFAULT_HISTORY_BUCKET: &str = "sedno_analysis_history";

/// Default history capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Session behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Progress estimator tick.
    pub tick_interval_ms: u64,
    /// Maximum characters kept from a report section.
    pub report_preview_chars: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            report_preview_chars: 200,
        }
    }
}

impl SessionSettings {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// History store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum number of kept entries.
    pub capacity: usize,
    /// Storage key of the history collection.
    pub bucket: String,
    /// Directory of the file backend. Defaults to `<data_dir>/sedno`.
    pub dir: Option<PathBuf>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            bucket: DEFAULT_HISTORY_BUCKET.to_string(),
            dir: None,
        }
    }
}

impl HistorySettings {
    /// Resolved directory of the file backend.
    #[must_use]
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("sedno")))
    }
}

/// Full client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SednoConfig {
    pub api_url: String,
    /// Bounds connection establishment only; streams are never timed out.
    pub connect_timeout_secs: u64,
    pub session: SessionSettings,
    pub history: HistorySettings,
}

impl Default for SednoConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            connect_timeout_secs: 10,
            session: SessionSettings::default(),
            history: HistorySettings::default(),
        }
    }
}

impl SednoConfig {
    /// Load configuration from disk and environment.
    ///
    /// `path_override` is an explicit config file path (from `--config`).
    ///
    /// # Errors
    /// Returns error if an explicit file cannot be read, the TOML is invalid,
    /// or a value fails validation.
    pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from_sources(
            path_override,
            |path| std::fs::read_to_string(path),
            |name| std::env::var(name).ok(),
            dirs::config_dir,
        )
    }

    /// Parse a TOML document and validate it, without env overrides.
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or fails validation.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn load_from_sources<FRead, FEnv, FRoot>(
        path_override: Option<&Path>,
        read_file: FRead,
        env_lookup: FEnv,
        config_root: FRoot,
    ) -> Result<Self, ConfigError>
    where
        FRead: Fn(&Path) -> Result<String, std::io::Error>,
        FEnv: Fn(&str) -> Option<String>,
        FRoot: Fn() -> Option<PathBuf>,
    {
        let text = read_config_text(path_override, &read_file, &env_lookup, &config_root)?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides(&env_lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides<FEnv>(&mut self, env_lookup: &FEnv) -> Result<(), ConfigError>
    where
        FEnv: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env_lookup("SEDNO_API_URL") {
            self.api_url = url;
        }
        if let Some(capacity) = env_lookup("SEDNO_HISTORY_CAPACITY") {
            self.history.capacity = capacity.parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid SEDNO_HISTORY_CAPACITY value `{capacity}`: expected a positive integer"
                ))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url must not be empty".to_string()));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        if self.session.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.tick_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_config_text<FRead, FEnv, FRoot>(
    path_override: Option<&Path>,
    read_file: &FRead,
    env_lookup: &FEnv,
    config_root: &FRoot,
) -> Result<String, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // Explicit locations must exist; discovered ones are optional.
    if let Some(path) = path_override {
        return Ok(read_file(path)?);
    }
    if let Some(path) = env_lookup("SEDNO_CONFIG") {
        return Ok(read_file(Path::new(&path))?);
    }
    if let Some(dir) = config_root() {
        if let Ok(text) = read_file(&dir.join("sedno").join("config.toml")) {
            tracing::debug!("Loaded config from {}", dir.display());
            return Ok(text);
        }
    }
    Ok(String::new())
}
