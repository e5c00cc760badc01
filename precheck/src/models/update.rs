//! Update payload models

use serde::{Deserialize, Serialize};
use xenapi_models::{AfterApplyGuidance, PoolPatchRecord, PoolUpdateRecord, UpdateAfterApplyGuidance};

use crate::models::host::Host;

/// How the rollout is driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// The operator picked a single patch or update
    #[default]
    Manual,

    /// Every update the pool needs is applied, reboots included
    Automated,
}

/// Common view over the two guidance enums
pub trait Guidance {
    fn requires_host_restart(&self) -> bool;
    fn requires_toolstack_restart(&self) -> bool;
}

impl Guidance for AfterApplyGuidance {
    fn requires_host_restart(&self) -> bool {
        matches!(self, AfterApplyGuidance::RestartHost)
    }

    fn requires_toolstack_restart(&self) -> bool {
        matches!(self, AfterApplyGuidance::RestartXapi)
    }
}

impl Guidance for UpdateAfterApplyGuidance {
    fn requires_host_restart(&self) -> bool {
        matches!(self, UpdateAfterApplyGuidance::RestartHost)
    }

    fn requires_toolstack_restart(&self) -> bool {
        matches!(self, UpdateAfterApplyGuidance::RestartXapi)
    }
}

/// What the host has to go through once the payload is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RebootGuidance {
    pub restart_host: bool,
    pub restart_toolstack: bool,
}

impl RebootGuidance {
    pub fn from_guidance<G: Guidance>(guidance: &[G]) -> Self {
        Self {
            restart_host: guidance.iter().any(|g| g.requires_host_restart()),
            restart_toolstack: guidance.iter().any(|g| g.requires_toolstack_restart()),
        }
    }

    /// Guidance assumed for supplemental packs and rolling pool upgrades
    pub fn implicit_restart() -> Self {
        Self {
            restart_host: true,
            restart_toolstack: false,
        }
    }
}

/// Single-file patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPatch {
    pub uuid: String,
    pub name: String,
    pub size: u64,
    pub after_apply_guidance: Vec<AfterApplyGuidance>,
}

impl From<PoolPatchRecord> for PoolPatch {
    fn from(record: PoolPatchRecord) -> Self {
        Self {
            uuid: record.uuid,
            name: record.name_label,
            size: record.size,
            after_apply_guidance: record.after_apply_guidance,
        }
    }
}

/// Multi-file pool update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub uuid: String,
    pub name: String,
    pub installation_size: u64,
    pub after_apply_guidance: Vec<UpdateAfterApplyGuidance>,
}

impl From<PoolUpdateRecord> for PoolUpdate {
    fn from(record: PoolUpdateRecord) -> Self {
        Self {
            uuid: record.uuid,
            name: record.name_label,
            installation_size: record.installation_size,
            after_apply_guidance: record.after_apply_guidance,
        }
    }
}

/// Either kind of payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpdatePayload {
    Patch(PoolPatch),
    Update(PoolUpdate),
}

impl UpdatePayload {
    pub fn uuid(&self) -> &str {
        match self {
            UpdatePayload::Patch(p) => &p.uuid,
            UpdatePayload::Update(u) => &u.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UpdatePayload::Patch(p) => &p.name,
            UpdatePayload::Update(u) => &u.name,
        }
    }

    pub fn installation_size(&self) -> u64 {
        match self {
            UpdatePayload::Patch(p) => p.size,
            UpdatePayload::Update(u) => u.installation_size,
        }
    }

    pub fn reboot_guidance(&self) -> RebootGuidance {
        match self {
            UpdatePayload::Patch(p) => RebootGuidance::from_guidance(&p.after_apply_guidance),
            UpdatePayload::Update(u) => RebootGuidance::from_guidance(&u.after_apply_guidance),
        }
    }
}

/// Updates queued per host of one pool, in host order
#[derive(Debug, Clone, Default)]
pub struct UpgradeSequence {
    pub entries: Vec<(Host, Vec<UpdatePayload>)>,
}

impl UpgradeSequence {
    pub fn new(entries: Vec<(Host, Vec<UpdatePayload>)>) -> Self {
        Self { entries }
    }

    /// Largest single update queued anywhere in the pool
    pub fn largest_in_pool(&self) -> u64 {
        self.entries
            .iter()
            .flat_map(|(_, updates)| updates.iter())
            .map(UpdatePayload::installation_size)
            .max()
            .unwrap_or(0)
    }
}
