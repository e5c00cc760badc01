//! Check plan builders
//!
//! The group layout is the same for patches and pool updates; the builders
//! only differ in how they expose their payload and its guidance.

use tracing::debug;

use crate::checks::{
    AssertCanEvacuateCheck, DiskSpaceForUpdatesCheck, HaOffCheck, HostLivenessCheck,
    HostNeedsRebootCheck, StoragePluggedCheck, UpdatePrecheckCheck,
};
use crate::models::{
    selected_pools, Host, PoolPatch, PoolUpdate, RebootGuidance, UpdateMode, UpdatePayload,
    UpgradeSequence,
};
use crate::plan::{
    CheckGroup, CheckPlan, PlanRequest, GROUP_DISK_SPACE, GROUP_EVACUATE, GROUP_HA,
    GROUP_LIVENESS, GROUP_REBOOT, GROUP_SERVER_SIDE, GROUP_STORAGE,
};

/// Disk space a host needs for the updates queued on it.
///
/// Newer pools apply updates one host at a time and need no margin. Otherwise
/// the master keeps room for the largest update in the pool, other hosts for
/// the largest update of their own.
pub fn required_disk_space(sequence: &UpgradeSequence, host: &Host, ely_or_greater: bool) -> u64 {
    let queued: Vec<u64> = sequence
        .entries
        .iter()
        .filter(|(h, _)| h.uuid == host.uuid)
        .flat_map(|(_, updates)| updates.iter().map(UpdatePayload::installation_size))
        .collect();
    let own: u64 = queued.iter().sum();

    if ely_or_greater {
        own
    } else if host.is_master {
        own + sequence.largest_in_pool()
    } else {
        own + queued.iter().copied().max().unwrap_or(0)
    }
}

/// Builds the check plan for one kind of payload
pub trait PlanBuilder: Send + Sync {
    /// Payload being rolled out. `None` for supplemental packs and rolling
    /// pool upgrades.
    fn payload(&self) -> Option<UpdatePayload>;

    /// Guidance of the payload, or an implicit host restart without one
    fn reboot_guidance(&self) -> RebootGuidance {
        self.payload()
            .map(|p| p.reboot_guidance())
            .unwrap_or_else(RebootGuidance::implicit_restart)
    }

    /// Groups shared by every payload kind
    fn build_common(&self, request: &PlanRequest) -> Vec<CheckGroup> {
        let mut groups = Vec::new();

        let mut liveness = CheckGroup::new(GROUP_LIVENESS);
        for host in &request.hosts {
            liveness.push(HostLivenessCheck::new(host.clone()));
        }
        groups.push(liveness);

        let mut ha = CheckGroup::new(GROUP_HA);
        for host in request.hosts.iter().filter(|h| h.is_master) {
            ha.push(HaOffCheck::new(host.clone()));
        }
        groups.push(ha);

        let mut storage = CheckGroup::new(GROUP_STORAGE);
        for host in &request.hosts {
            storage.push(StoragePluggedCheck::new(host.clone()));
        }
        groups.push(storage);

        if request.mode == UpdateMode::Automated {
            let mut disk = CheckGroup::new(GROUP_DISK_SPACE);
            for pool in selected_pools(&request.hosts) {
                let Some(sequence) = request.upgrade_sequences.get(&pool.uuid) else {
                    debug!(pool = %pool.name, "No upgrade sequence for pool");
                    continue;
                };
                for (host, _) in &sequence.entries {
                    let required = required_disk_space(sequence, host, pool.ely_or_greater);
                    disk.push(DiskSpaceForUpdatesCheck::new(host.clone(), required));
                }
            }
            groups.push(disk);
        }

        groups
    }

    /// Full plan: the common groups followed by the payload specific ones
    fn build_plan(&self, request: &PlanRequest) -> CheckPlan {
        let mut groups = self.build_common(request);
        let payload = self.payload();

        if let Some(payload) = &payload {
            let mut server_side = CheckGroup::new(GROUP_SERVER_SIDE);
            for host in &request.hosts {
                server_side.push(UpdatePrecheckCheck::new(host.clone(), payload.clone()));
            }
            groups.push(server_side);
        }

        let guidance = self.reboot_guidance();

        if request.mode == UpdateMode::Manual {
            let mut reboot = CheckGroup::new(GROUP_REBOOT);
            for host in &request.hosts {
                reboot.push(HostNeedsRebootCheck::new(host.clone(), guidance));
            }
            groups.push(reboot);
        }

        if payload.is_none() || guidance.restart_host {
            let mut evacuate = CheckGroup::new(GROUP_EVACUATE);
            for host in &request.hosts {
                evacuate.push(AssertCanEvacuateCheck::new(host.clone()));
            }
            groups.push(evacuate);
        }

        let plan = CheckPlan { groups };
        debug!(
            groups = plan.groups.len(),
            checks = plan.check_count(),
            mode = ?request.mode,
            "Check plan built"
        );
        plan
    }
}

/// Plan builder for single-file patches
#[derive(Debug, Clone, Default)]
pub struct PatchPlanBuilder {
    pub patch: Option<PoolPatch>,
}

impl PatchPlanBuilder {
    pub fn new(patch: Option<PoolPatch>) -> Self {
        Self { patch }
    }
}

impl PlanBuilder for PatchPlanBuilder {
    fn payload(&self) -> Option<UpdatePayload> {
        self.patch.clone().map(UpdatePayload::Patch)
    }
}

/// Plan builder for multi-file pool updates
#[derive(Debug, Clone, Default)]
pub struct PoolUpdatePlanBuilder {
    pub update: Option<PoolUpdate>,
}

impl PoolUpdatePlanBuilder {
    pub fn new(update: Option<PoolUpdate>) -> Self {
        Self { update }
    }
}

impl PlanBuilder for PoolUpdatePlanBuilder {
    fn payload(&self) -> Option<UpdatePayload> {
        self.update.clone().map(UpdatePayload::Update)
    }
}
