//! Settings file management

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::PrecheckError;
use crate::logs::LogLevel;
use crate::models::UpdateMode;

/// Tool settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Pool coordinator connection
    pub server: ServerSettings,

    /// Rollout mode
    #[serde(default)]
    pub mode: UpdateMode,

    /// Uuids of the hosts to check; every host of the pool when empty
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Uuid of the patch or update to roll out. Absent for supplemental
    /// packs and rolling pool upgrades.
    #[serde(default)]
    pub update_uuid: Option<String>,

    /// Kind of the payload behind `update_uuid`
    #[serde(default)]
    pub update_kind: UpdateKind,

    /// Task polling backoff
    #[serde(default)]
    pub task_poll: TaskPollSettings,
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, PrecheckError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            PrecheckError::ConfigError(format!("Unable to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, PrecheckError> {
        let settings: Settings = serde_json::from_str(contents)?;
        if settings.server.url.is_empty() {
            return Err(PrecheckError::ConfigError("server.url is empty".to_string()));
        }
        Ok(settings)
    }
}

/// Payload kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Patch,
    #[default]
    Update,
}

/// Coordinator connection settings
#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the coordinator
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    pub password: SecretString,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_username() -> String {
    "root".to_string()
}

/// Backoff between task polls, in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct TaskPollSettings {
    #[serde(default = "default_poll_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_poll_max_ms")]
    pub max_ms: u64,
}

fn default_poll_base_ms() -> u64 {
    500
}

fn default_poll_max_ms() -> u64 {
    10_000
}

impl Default for TaskPollSettings {
    fn default() -> Self {
        Self {
            base_ms: default_poll_base_ms(),
            max_ms: default_poll_max_ms(),
        }
    }
}
