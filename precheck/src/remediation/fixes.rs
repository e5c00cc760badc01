//! Automatic fixes offered by problems

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::actions::{ActionProgress, AsyncAction};
use crate::errors::PrecheckError;
use crate::models::{Host, Pool};
use crate::problems::Fix;
use crate::service::PoolService;

impl Fix {
    /// Build the action for this fix.
    ///
    /// `None` when the fix no longer applies, e.g. HA was turned off since
    /// the check ran.
    pub async fn create_action(
        &self,
        service: &Arc<dyn PoolService>,
    ) -> Result<Option<Arc<dyn AsyncAction>>, PrecheckError> {
        let action: Arc<dyn AsyncAction> = match self {
            Fix::DisableHa(pool) => {
                if !service.ha_enabled(pool).await? {
                    debug!(pool = %pool.name, "HA already off");
                    return Ok(None);
                }
                Arc::new(DisableHaAction::new(service.clone(), pool.clone()))
            }
            Fix::PlugStorage(host) => Arc::new(PlugStorageAction::new(service.clone(), host.clone())),
            Fix::CleanupDiskSpace(host) => {
                Arc::new(CleanupDiskSpaceAction::new(service.clone(), host.clone()))
            }
            Fix::EjectCd { vm_ref, vm_name } => Arc::new(EjectCdAction::new(
                service.clone(),
                vm_ref.clone(),
                vm_name.clone(),
            )),
        };
        Ok(Some(action))
    }
}

/// Turns high availability off on a pool
pub struct DisableHaAction {
    service: Arc<dyn PoolService>,
    pool: Pool,
}

impl DisableHaAction {
    pub fn new(service: Arc<dyn PoolService>, pool: Pool) -> Self {
        Self { service, pool }
    }
}

#[async_trait]
impl AsyncAction for DisableHaAction {
    fn description(&self) -> String {
        format!("Disabling HA on {}", self.pool.name)
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        if progress.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }
        self.service.disable_ha(&self.pool).await?;
        info!(pool = %self.pool.name, "HA disabled");
        Ok(())
    }
}

/// Plugs every storage connection of a host
pub struct PlugStorageAction {
    service: Arc<dyn PoolService>,
    host: Host,
}

impl PlugStorageAction {
    pub fn new(service: Arc<dyn PoolService>, host: Host) -> Self {
        Self { service, host }
    }
}

#[async_trait]
impl AsyncAction for PlugStorageAction {
    fn description(&self) -> String {
        format!("Repairing storage on {}", self.host.name)
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        if progress.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }
        self.service.plug_storage(&self.host).await?;
        info!(host = %self.host.name, "Storage plugged");
        Ok(())
    }
}

/// Removes residual update files from a host
pub struct CleanupDiskSpaceAction {
    service: Arc<dyn PoolService>,
    host: Host,
}

impl CleanupDiskSpaceAction {
    pub fn new(service: Arc<dyn PoolService>, host: Host) -> Self {
        Self { service, host }
    }
}

#[async_trait]
impl AsyncAction for CleanupDiskSpaceAction {
    fn description(&self) -> String {
        format!("Cleaning up disk space on {}", self.host.name)
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        if progress.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }
        self.service.cleanup_disk_space(&self.host).await?;
        info!(host = %self.host.name, "Disk space cleaned up");
        Ok(())
    }
}

/// Ejects the CD of a VM
pub struct EjectCdAction {
    service: Arc<dyn PoolService>,
    vm_ref: String,
    vm_name: String,
}

impl EjectCdAction {
    pub fn new(service: Arc<dyn PoolService>, vm_ref: String, vm_name: String) -> Self {
        Self {
            service,
            vm_ref,
            vm_name,
        }
    }
}

#[async_trait]
impl AsyncAction for EjectCdAction {
    fn description(&self) -> String {
        format!("Ejecting CD from {}", self.vm_name)
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        if progress.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }
        self.service.eject_cd(&self.vm_ref).await?;
        info!(vm = %self.vm_name, "CD ejected");
        Ok(())
    }
}
