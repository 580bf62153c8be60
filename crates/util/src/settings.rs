//! User settings persistence for the reqterm CLI.
//!
//! A small JSON-backed store for defaults the user can change between runs:
//! the environment picked when none is given, how many history entries to keep,
//! and the per-request timeout. The file lives in the standard configuration
//! directory (`~/.config/reqterm/settings.json` on most platforms) unless
//! `REQTERM_SETTINGS_PATH` overrides it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::history_store::DEFAULT_HISTORY_LIMIT;
use crate::path_processing::{config_file_path, expand_tilde};

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "REQTERM_SETTINGS_PATH";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Request timeout applied when the settings file does not name one.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted setting values. Missing fields fall back to built-in defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

/// Thread-safe settings store backed by a JSON file.
#[derive(Debug)]
pub struct UserSettings {
    path: PathBuf,
    payload: Mutex<SettingsPayload>,
    persist_to_disk: bool,
}

impl UserSettings {
    /// Load settings from the default location.
    pub fn load() -> Result<Self, SettingsError> {
        Self::with_path(config_file_path(SETTINGS_PATH_ENV, SETTINGS_FILE_NAME))
    }

    /// Load settings from an explicit path.
    pub fn with_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let resolved_path = expand_tilde(&path.as_ref().to_string_lossy());
        let payload = load_payload(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            payload: Mutex::new(payload),
            persist_to_disk: true,
        })
    }

    /// Build an in-memory store used when the config directory cannot be accessed.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            payload: Mutex::new(SettingsPayload::default()),
            persist_to_disk: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment used when a run does not select one explicitly.
    pub fn default_environment(&self) -> Option<String> {
        self.payload.lock().expect("settings lock poisoned").default_environment.clone()
    }

    pub fn history_limit(&self) -> usize {
        self.payload
            .lock()
            .expect("settings lock poisoned")
            .history_limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .payload
            .lock()
            .expect("settings lock poisoned")
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Persist a new default environment. `None` clears it.
    pub fn set_default_environment(&self, environment: Option<String>) -> Result<(), SettingsError> {
        let mut payload = self.payload.lock().expect("settings lock poisoned");
        payload.default_environment = environment.filter(|name| !name.trim().is_empty());
        if self.persist_to_disk {
            self.save_locked(&payload)?;
        }
        Ok(())
    }

    fn save_locked(&self, payload: &SettingsPayload) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(payload)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn load_payload(path: &Path) -> Result<SettingsPayload, SettingsError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(payload) => Ok(payload),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse settings file; using defaults"
                );
                Ok(SettingsPayload::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(SettingsPayload::default()),
        Err(error) => Err(SettingsError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = UserSettings::with_path(dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.default_environment(), None);
        assert_eq!(settings.history_limit(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(settings.request_timeout(), Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn default_environment_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = UserSettings::with_path(&path).unwrap();
        settings.set_default_environment(Some("staging".into())).unwrap();

        let reloaded = UserSettings::with_path(&path).unwrap();
        assert_eq!(reloaded.default_environment().as_deref(), Some("staging"));
    }

    #[test]
    fn reads_limits_and_ignores_zero_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"history_limit": 5, "request_timeout_secs": 0}"#).unwrap();

        let settings = UserSettings::with_path(&path).unwrap();
        assert_eq!(settings.history_limit(), 5);
        assert_eq!(settings.request_timeout(), Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        let settings = UserSettings::with_path(&path).unwrap();
        assert_eq!(settings.history_limit(), DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn ephemeral_store_never_touches_disk() {
        let settings = UserSettings::ephemeral();
        settings.set_default_environment(Some("dev".into())).unwrap();
        assert_eq!(settings.default_environment().as_deref(), Some("dev"));
        assert_eq!(settings.path(), Path::new(""));
    }

    #[test]
    fn load_honors_env_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"default_environment": "prod"}"#).unwrap();
        temp_env::with_var(SETTINGS_PATH_ENV, Some(path.to_string_lossy().to_string()), || {
            let settings = UserSettings::load().unwrap();
            assert_eq!(settings.default_environment().as_deref(), Some("prod"));
        });
    }
}
