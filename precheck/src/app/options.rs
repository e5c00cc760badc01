//! Application configuration options

use std::time::Duration;

use crate::models::UpdateMode;
use crate::storage::settings::{Settings, TaskPollSettings, UpdateKind};
use crate::utils::CooldownOptions;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Rollout configuration
    pub rollout: RolloutOptions,

    /// Behavior after the first run
    pub actions: ActionOptions,

    /// Backoff between task polls
    pub task_poll: CooldownOptions,
}

impl AppOptions {
    /// Options from the settings file; actions come from the command line
    pub fn from_settings(settings: &Settings, actions: ActionOptions) -> Self {
        Self {
            rollout: RolloutOptions {
                mode: settings.mode,
                hosts: settings.hosts.clone(),
                update_uuid: settings.update_uuid.clone(),
                update_kind: settings.update_kind,
            },
            actions,
            task_poll: cooldown_from(&settings.task_poll),
        }
    }
}

fn cooldown_from(poll: &TaskPollSettings) -> CooldownOptions {
    CooldownOptions {
        base_delay: Duration::from_millis(poll.base_ms),
        max_delay: Duration::from_millis(poll.max_ms.max(poll.base_ms)),
        ..Default::default()
    }
}

/// What to roll out and where
#[derive(Debug, Clone, Default)]
pub struct RolloutOptions {
    pub mode: UpdateMode,
    pub hosts: Vec<String>,
    pub update_uuid: Option<String>,
    pub update_kind: UpdateKind,
}

/// Follow-up actions requested on the command line
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    /// Resolve every fixable problem, then check again
    pub resolve_all: bool,

    /// Apply the payload once the prechecks pass
    pub apply: bool,

    /// Only print rows that carry a problem
    pub failures_only: bool,
}
