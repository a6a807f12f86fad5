//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    services::{
        scoring::ScoringRules,
        session_service::{LockInPolicy, SessionSettings},
    },
    state::{
        clock::{DEFAULT_QUESTION_DURATION, TimerMode},
        screen::ScreenTable,
    },
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ROOM_CONFIG_PATH";
const DEFAULT_CONTENT_DIR: &str = "content";
const DEFAULT_PASSCODE_LENGTH: usize = 6;

/// Which shared state store backs the sessions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreBackend {
    /// In-process store, optionally seeded from a JSON file.
    #[default]
    Memory,
    /// CouchDB over HTTP; connection details come from `COUCH_*` variables.
    Couch,
    /// MongoDB; connection details come from `MONGO_*` variables.
    Mongo,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    backend: StoreBackend,
    seed_file: Option<PathBuf>,
    content_directory: PathBuf,
    passcode_length: usize,
    admin_token: Option<String>,
    session: SessionSettings,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        backend = ?app_config.backend,
                        timer = ?app_config.session.timer_mode,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    pub fn backend(&self) -> &StoreBackend {
        &self.backend
    }

    /// Seed file loaded into the memory backend at startup.
    pub fn seed_file(&self) -> Option<&PathBuf> {
        self.seed_file.as_ref()
    }

    pub fn content_directory(&self) -> &PathBuf {
        &self.content_directory
    }

    pub fn passcode_length(&self) -> usize {
        self.passcode_length
    }

    /// Token required on `/admin` routes; `None` disables them.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn session(&self) -> &SessionSettings {
        &self.session
    }

    /// Replace the session settings, keeping everything else.
    pub fn with_session(mut self, session: SessionSettings) -> Self {
        self.session = session;
        self
    }

    /// Set the admin token.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    store: RawStore,
    timer: RawTimer,
    content: RawContent,
    passcode_length: Option<usize>,
    scoring: ScoringRules,
    lock_in: LockInPolicy,
    staged_levels: Option<Vec<u32>>,
    admin_token: Option<String>,
    option_seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStore {
    backend: StoreBackend,
    seed_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTimer {
    mode: TimerMode,
    question_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContent {
    directory: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let question_duration = value
            .timer
            .question_seconds
            .filter(|seconds| *seconds > 0)
            .map_or(DEFAULT_QUESTION_DURATION, Duration::from_secs);
        let screens = value
            .staged_levels
            .map_or_else(ScreenTable::default, ScreenTable::new);

        Self {
            backend: value.store.backend,
            seed_file: value.store.seed_file,
            content_directory: value
                .content
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR)),
            passcode_length: value
                .passcode_length
                .filter(|length| *length > 0)
                .unwrap_or(DEFAULT_PASSCODE_LENGTH),
            admin_token: value.admin_token.filter(|token| !token.trim().is_empty()),
            session: SessionSettings {
                timer_mode: value.timer.mode,
                question_duration,
                scoring: value.scoring,
                lock_in: value.lock_in,
                screens,
                option_seed: value.option_seed,
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.backend(), &StoreBackend::Memory);
        assert_eq!(config.passcode_length(), 6);
        assert_eq!(config.content_directory(), &PathBuf::from("content"));
        assert_eq!(config.admin_token(), None);

        let session = config.session();
        assert_eq!(session.timer_mode, TimerMode::AbsoluteStart);
        assert_eq!(session.question_duration, Duration::from_secs(30));
        assert_eq!(session.scoring, ScoringRules::default());
        assert_eq!(session.lock_in, LockInPolicy::Immediate);
        assert_eq!(session.screens, ScreenTable::default());
    }

    #[test]
    fn full_document_overrides_everything() {
        let config = AppConfig::from_json(
            r#"{
                "store": { "backend": "couch" },
                "timer": { "mode": "pushedCountdown", "questionSeconds": 20 },
                "content": { "directory": "/srv/questions" },
                "passcodeLength": 4,
                "scoring": { "correct": 3, "wrongOrSkipped": -1 },
                "lockIn": "atReveal",
                "stagedLevels": [4],
                "adminToken": "letmein",
                "optionSeed": 99
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend(), &StoreBackend::Couch);
        assert_eq!(config.passcode_length(), 4);
        assert_eq!(config.admin_token(), Some("letmein"));
        let session = config.session();
        assert_eq!(session.timer_mode, TimerMode::PushedCountdown);
        assert_eq!(session.question_duration, Duration::from_secs(20));
        assert_eq!(session.scoring.correct, 3);
        assert_eq!(session.lock_in, LockInPolicy::AtReveal);
        assert_eq!(session.screens, ScreenTable::new(vec![4]));
        assert_eq!(session.option_seed, Some(99));
    }

    #[test]
    fn blank_admin_token_disables_admin_routes() {
        let config = AppConfig::from_json(r#"{ "adminToken": "  " }"#).unwrap();
        assert_eq!(config.admin_token(), None);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(AppConfig::from_json(r#"{ "store": { "backend": "redis" } }"#).is_err());
    }
}
