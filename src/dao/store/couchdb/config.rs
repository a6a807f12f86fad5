use std::time::Duration;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_CHANGES_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MERGE_ATTEMPTS: u32 = 5;

/// Runtime configuration describing how to connect to CouchDB.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// How long a `_changes` long-poll may stay open before CouchDB answers empty.
    pub changes_timeout: Duration,
    /// Revision conflicts tolerated by a single merge before giving up.
    pub max_merge_attempts: u32,
}

impl CouchConfig {
    /// Construct a configuration from explicit base URL and database name.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
            changes_timeout: DEFAULT_CHANGES_TIMEOUT,
            max_merge_attempts: DEFAULT_MERGE_ATTEMPTS,
        }
    }

    /// Attach basic-auth credentials to the configuration.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Build a configuration by reading the expected environment variables.
    ///
    /// `COUCH_BASE_URL` and `COUCH_DB` are required; credentials are only used
    /// when both `COUCH_USERNAME` and `COUCH_PASSWORD` are set, and
    /// `COUCH_CHANGES_TIMEOUT_MS` optionally tunes the long-poll window.
    pub fn from_env() -> CouchResult<Self> {
        let base_url =
            std::env::var("COUCH_BASE_URL").map_err(|_| CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL",
            })?;
        let database = std::env::var("COUCH_DB")
            .map_err(|_| CouchDaoError::MissingEnvVar { var: "COUCH_DB" })?;

        let mut config = Self::new(base_url, database);

        if let (Some(username), Some(password)) = (
            std::env::var("COUCH_USERNAME").ok(),
            std::env::var("COUCH_PASSWORD").ok(),
        ) {
            config = config.with_credentials(username, password);
        }

        if let Some(timeout) = std::env::var("COUCH_CHANGES_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.changes_timeout = Duration::from_millis(timeout);
        }

        Ok(config)
    }
}
