//! Persistent user preferences for scrobbling and artwork downloads.
//!
//! Values are stored as a small TOML document under the platform config
//! directory and rewritten on every change.

use std::path::PathBuf;
use std::sync::Mutex;

use log::warn;

/// Album-art download policy applied during library reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtDownloadPolicy {
    Never,
    #[default]
    WifiOnly,
    Always,
}

/// Scalar settings persisted to `quaver.toml`.
#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize, serde::Serialize)]
pub struct PreferenceValues {
    #[serde(default)]
    pub scrobbling_enabled: bool,
    #[serde(default)]
    pub art_download_policy: ArtDownloadPolicy,
    #[serde(default)]
    pub lastfm_username: String,
    #[serde(default)]
    pub lastfm_session_key: String,
}

/// Shared handle over the preference file.
pub struct Preferences {
    path: Option<PathBuf>,
    values: Mutex<PreferenceValues>,
}

impl Preferences {
    /// Default preference file location under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("quaver").join("quaver.toml"))
    }

    /// Loads preferences from `path`, falling back to defaults when the file
    /// is missing or unparsable.
    pub fn load(path: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<PreferenceValues>(&content) {
                Ok(values) => values,
                Err(err) => {
                    warn!(
                        "Preferences file {} is unparsable, using defaults: {}",
                        path.display(),
                        err
                    );
                    PreferenceValues::default()
                }
            },
            Err(_) => PreferenceValues::default(),
        };
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// Creates a preference store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(PreferenceValues::default()),
        }
    }

    pub fn scrobbling_enabled(&self) -> bool {
        self.snapshot().scrobbling_enabled
    }

    pub fn art_download_policy(&self) -> ArtDownloadPolicy {
        self.snapshot().art_download_policy
    }

    pub fn lastfm_username(&self) -> String {
        self.snapshot().lastfm_username
    }

    pub fn lastfm_session_key(&self) -> String {
        self.snapshot().lastfm_session_key
    }

    /// Clones the full value set.
    pub fn snapshot(&self) -> PreferenceValues {
        self.values
            .lock()
            .expect("preferences lock poisoned")
            .clone()
    }

    pub fn set_scrobbling_enabled(&self, enabled: bool) {
        self.update(|values| values.scrobbling_enabled = enabled);
    }

    pub fn set_art_download_policy(&self, policy: ArtDownloadPolicy) {
        self.update(|values| values.art_download_policy = policy);
    }

    /// Stores the Last.fm account and session key together; empty strings
    /// clear a previous login.
    pub fn set_lastfm_credentials(&self, username: &str, session_key: &str) {
        self.update(|values| {
            values.lastfm_username = username.to_string();
            values.lastfm_session_key = session_key.to_string();
        });
    }

    fn update(&self, apply: impl FnOnce(&mut PreferenceValues)) {
        let snapshot = {
            let mut values = self.values.lock().expect("preferences lock poisoned");
            apply(&mut values);
            values.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, values: &PreferenceValues) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(
                    "Failed to create preferences directory {}: {}",
                    parent.display(),
                    err
                );
                return;
            }
        }
        match toml::to_string(values) {
            Ok(content) => {
                if let Err(err) = std::fs::write(path, content) {
                    warn!("Failed to persist preferences to {}: {}", path.display(), err);
                }
            }
            Err(err) => warn!("Failed to serialize preferences: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtDownloadPolicy, Preferences};

    #[test]
    fn test_defaults_match_first_run_behavior() {
        let prefs = Preferences::in_memory();
        assert!(!prefs.scrobbling_enabled());
        assert_eq!(prefs.art_download_policy(), ArtDownloadPolicy::WifiOnly);
        assert!(prefs.lastfm_username().is_empty());
        assert!(prefs.lastfm_session_key().is_empty());
    }

    #[test]
    fn test_set_values_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("quaver.toml");

        let prefs = Preferences::load(path.clone());
        prefs.set_scrobbling_enabled(true);
        prefs.set_art_download_policy(ArtDownloadPolicy::Always);
        prefs.set_lastfm_credentials("alice", "session-key");

        let reloaded = Preferences::load(path);
        assert!(reloaded.scrobbling_enabled());
        assert_eq!(reloaded.art_download_policy(), ArtDownloadPolicy::Always);
        assert_eq!(reloaded.lastfm_username(), "alice");
        assert_eq!(reloaded.lastfm_session_key(), "session-key");
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("quaver.toml");
        std::fs::write(&path, "not = [valid").expect("failed to write file");

        let prefs = Preferences::load(path);
        assert!(!prefs.scrobbling_enabled());
        assert_eq!(prefs.art_download_policy(), ArtDownloadPolicy::WifiOnly);
    }

    #[test]
    fn test_clearing_credentials_overwrites_previous_login() {
        let prefs = Preferences::in_memory();
        prefs.set_lastfm_credentials("alice", "session-key");
        prefs.set_lastfm_credentials("", "");
        assert!(prefs.lastfm_username().is_empty());
        assert!(prefs.lastfm_session_key().is_empty());
    }
}
