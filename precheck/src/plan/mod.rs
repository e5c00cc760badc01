//! Check plans
//!
//! A plan is the ordered list of named check groups one run executes.

pub mod builder;

use std::collections::HashMap;
use std::sync::Arc;

use crate::checks::Check;
use crate::models::{Host, UpdateMode, UpgradeSequence};

pub use builder::{required_disk_space, PatchPlanBuilder, PlanBuilder, PoolUpdatePlanBuilder};

pub const GROUP_LIVENESS: &str = "Checking server liveness status";
pub const GROUP_HA: &str = "Checking HA status";
pub const GROUP_STORAGE: &str = "Checking storage connections status";
pub const GROUP_DISK_SPACE: &str = "Checking disk space";
pub const GROUP_SERVER_SIDE: &str = "Checking server side status";
pub const GROUP_REBOOT: &str = "Checking if servers need a reboot";
pub const GROUP_EVACUATE: &str = "Checking that servers can be evacuated";

/// A named, ordered sequence of checks executed as a unit
#[derive(Clone)]
pub struct CheckGroup {
    pub name: String,
    pub checks: Vec<Arc<dyn Check>>,
}

impl CheckGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn push(&mut self, check: impl Check + 'static) {
        self.checks.push(Arc::new(check));
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl std::fmt::Debug for CheckGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckGroup")
            .field("name", &self.name)
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// Ordered check groups of one run
#[derive(Debug, Clone, Default)]
pub struct CheckPlan {
    pub groups: Vec<CheckGroup>,
}

impl CheckPlan {
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn check_count(&self) -> usize {
        self.groups.iter().map(CheckGroup::len).sum()
    }
}

/// Inputs of a plan besides the payload
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Selected hosts, in display order
    pub hosts: Vec<Host>,
    pub mode: UpdateMode,
    /// Updates queued per pool uuid, used in automated mode
    pub upgrade_sequences: HashMap<String, UpgradeSequence>,
}

impl PlanRequest {
    pub fn new(hosts: Vec<Host>, mode: UpdateMode) -> Self {
        Self {
            hosts,
            mode,
            upgrade_sequences: HashMap::new(),
        }
    }

    pub fn with_upgrade_sequence(mut self, pool_uuid: &str, sequence: UpgradeSequence) -> Self {
        self.upgrade_sequences.insert(pool_uuid.to_string(), sequence);
        self
    }
}
