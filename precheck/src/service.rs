//! Remote pool service contract
//!
//! Everything the engine needs from the pool coordinator goes through
//! [`PoolService`]. The JSON-RPC client in [`crate::http`] is the production
//! implementation; tests plug in an in-memory one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use xenapi_models::{LivepatchStatus, TaskRecord, TaskStatusType};

use crate::errors::PrecheckError;
use crate::models::{Host, Pool, UpdatePayload};

/// Opaque handle of a server-side task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef(pub String);

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a VM keeps a host from being evacuated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvacuationReason {
    /// A CD is inserted in a VM that cannot be migrated with it
    CdInserted,
    /// The VM has disks on storage only this host can reach
    LocalStorage,
    /// No other host has enough free memory
    NotEnoughMemory,
    /// Guest tools are missing, the VM cannot be live migrated
    ToolsMissing,
    /// Anything else, carrying the server's failure code
    Other(String),
}

/// One VM blocking evacuation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvacuationBlocker {
    pub vm_ref: String,
    pub vm_name: String,
    pub reason: EvacuationReason,
}

/// Remote pool service
#[async_trait]
pub trait PoolService: Send + Sync {
    /// Whether the host's toolstack reports it live
    async fn host_is_live(&self, host: &Host) -> Result<bool, PrecheckError>;

    /// Whether high availability is enabled on the pool
    async fn ha_enabled(&self, pool: &Pool) -> Result<bool, PrecheckError>;

    /// Names of storage repositories the host is not connected to
    async fn unplugged_storage(&self, host: &Host) -> Result<Vec<String>, PrecheckError>;

    /// Free space available for update files, in bytes
    async fn available_disk_space(&self, host: &Host) -> Result<u64, PrecheckError>;

    /// Server-side applicability check of the host's copy of the payload.
    ///
    /// A rejected precheck surfaces as [`PrecheckError::Remote`]; a payload
    /// the host does not know about as [`PrecheckError::NotFound`].
    async fn precheck_update(
        &self,
        host: &Host,
        payload: &UpdatePayload,
    ) -> Result<LivepatchStatus, PrecheckError>;

    /// VMs that would prevent the host from being evacuated
    async fn evacuation_blockers(&self, host: &Host) -> Result<Vec<EvacuationBlocker>, PrecheckError>;

    async fn disable_ha(&self, pool: &Pool) -> Result<(), PrecheckError>;

    async fn plug_storage(&self, host: &Host) -> Result<(), PrecheckError>;

    /// Remove residual update files from the host
    async fn cleanup_disk_space(&self, host: &Host) -> Result<(), PrecheckError>;

    async fn eject_cd(&self, vm_ref: &str) -> Result<(), PrecheckError>;

    async fn is_update_applied(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<bool, PrecheckError>;

    /// Apply the payload and wait for the server to finish
    async fn apply_update(&self, payload: &UpdatePayload, host: &Host) -> Result<(), PrecheckError>;

    /// Start applying the payload, returning the task to poll
    async fn apply_update_async(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<TaskRef, PrecheckError>;

    async fn task_record(&self, task: &TaskRef) -> Result<TaskRecord, PrecheckError>;

    async fn destroy_task(&self, task: &TaskRef) -> Result<(), PrecheckError>;
}
