//! Pool service over JSON-RPC

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use xenapi_models::{
    HostRecord, PbdRecord, PoolPatchRecord, PoolRecord, PoolUpdateRecord, VbdRecord, VbdType,
};

use crate::errors::PrecheckError;
use crate::http::client::JsonRpcClient;
use crate::models::{Host, Pool, PoolPatch, PoolUpdate, UpdatePayload};
use crate::service::{
    EvacuationBlocker, EvacuationReason, LivepatchStatus, PoolService, TaskRecord, TaskRef,
};

/// First platform version of pools that apply updates one host at a time
const ELY_PLATFORM_VERSION: [u32; 3] = [2, 2, 50];

const DISK_SPACE_PLUGIN: &str = "disk-space";

/// [`PoolService`] backed by the coordinator's JSON-RPC API
pub struct XenApiService {
    client: Arc<JsonRpcClient>,
}

impl XenApiService {
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }

    /// Hosts of the connected pool. An empty selection means every host.
    pub async fn load_hosts(&self, selection: &[String]) -> Result<Vec<Host>, PrecheckError> {
        let pools: HashMap<String, PoolRecord> =
            self.client.session_call("pool.get_all_records", vec![]).await?;
        let records: HashMap<String, HostRecord> =
            self.client.session_call("host.get_all_records", vec![]).await?;

        let Some((pool_ref, pool_record)) = pools.into_iter().next() else {
            return Err(PrecheckError::NotFound("pool".to_string()));
        };

        let master = records.get(&pool_record.master).ok_or_else(|| {
            PrecheckError::NotFound(format!("master host {}", pool_record.master))
        })?;
        let pool = Pool {
            uuid: pool_record.uuid.clone(),
            name: pool_record.name_label.clone(),
            opaque_ref: pool_ref,
            master_uuid: master.uuid.clone(),
            ely_or_greater: is_ely_or_greater(master),
        };

        let mut hosts: Vec<Host> = records
            .into_iter()
            .filter(|(_, r)| {
                selection.is_empty() || selection.iter().any(|s| s.eq_ignore_ascii_case(&r.uuid))
            })
            .map(|(opaque_ref, r)| Host {
                is_master: opaque_ref == pool_record.master,
                uuid: r.uuid,
                name: r.name_label,
                opaque_ref,
                pool: pool.clone(),
            })
            .collect();

        // master first, then by name
        hosts.sort_by(|a, b| b.is_master.cmp(&a.is_master).then(a.name.cmp(&b.name)));

        if hosts.is_empty() {
            return Err(PrecheckError::NotFound("no matching hosts".to_string()));
        }
        info!(pool = %pool.name, hosts = hosts.len(), "Hosts loaded");
        Ok(hosts)
    }

    pub async fn load_pool_update(&self, uuid: &str) -> Result<PoolUpdate, PrecheckError> {
        let opaque_ref = self.lookup("pool_update", uuid).await?;
        let record: PoolUpdateRecord = self
            .client
            .session_call("pool_update.get_record", vec![json!(opaque_ref)])
            .await?;
        Ok(record.into())
    }

    pub async fn load_pool_patch(&self, uuid: &str) -> Result<PoolPatch, PrecheckError> {
        let opaque_ref = self.lookup("pool_patch", uuid).await?;
        let record: PoolPatchRecord = self
            .client
            .session_call("pool_patch.get_record", vec![json!(opaque_ref)])
            .await?;
        Ok(record.into())
    }

    /// Opaque reference of an object by uuid
    async fn lookup(&self, class: &str, uuid: &str) -> Result<String, PrecheckError> {
        let method = format!("{}.get_by_uuid", class);
        match self
            .client
            .session_call::<String>(&method, vec![json!(uuid.to_lowercase())])
            .await
        {
            Err(PrecheckError::Remote(failure)) if failure.code() == "UUID_INVALID" => {
                Err(PrecheckError::NotFound(format!("{} {}", class, uuid)))
            }
            other => other,
        }
    }

    async fn payload_ref(&self, payload: &UpdatePayload) -> Result<String, PrecheckError> {
        match payload {
            UpdatePayload::Patch(p) => self.lookup("pool_patch", &p.uuid).await,
            UpdatePayload::Update(u) => self.lookup("pool_update", &u.uuid).await,
        }
    }

    async fn pbd_records(&self, host: &Host) -> Result<Vec<PbdRecord>, PrecheckError> {
        let pbds: Vec<String> = self
            .client
            .session_call("host.get_PBDs", vec![json!(host.opaque_ref)])
            .await?;
        let mut records = Vec::with_capacity(pbds.len());
        for pbd in pbds {
            records.push(
                self.client
                    .session_call("PBD.get_record", vec![json!(pbd)])
                    .await?,
            );
        }
        Ok(records)
    }

    async fn inserted_cds(&self, vm_ref: &str) -> Result<Vec<String>, PrecheckError> {
        let vbds: Vec<String> = self
            .client
            .session_call("VM.get_VBDs", vec![json!(vm_ref)])
            .await?;
        let mut inserted = Vec::new();
        for vbd in vbds {
            let record: VbdRecord = self
                .client
                .session_call("VBD.get_record", vec![json!(vbd)])
                .await?;
            if record.vbd_type == VbdType::CD && !record.empty {
                inserted.push(vbd);
            }
        }
        Ok(inserted)
    }

    async fn call_disk_space_plugin(&self, host: &Host, function: &str) -> Result<String, PrecheckError> {
        self.client
            .session_call(
                "host.call_plugin",
                vec![
                    json!(host.opaque_ref),
                    json!(DISK_SPACE_PLUGIN),
                    json!(function),
                    json!({}),
                ],
            )
            .await
    }
}

fn is_ely_or_greater(master: &HostRecord) -> bool {
    let Some(version) = master.software_version.get("platform_version") else {
        return false;
    };
    let parts: Vec<u32> = version
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect();
    let mut padded = [0u32; 3];
    for (slot, part) in padded.iter_mut().zip(parts) {
        *slot = part;
    }
    padded >= ELY_PLATFORM_VERSION
}

fn evacuation_reason(code: &str) -> EvacuationReason {
    match code {
        "HOST_NOT_ENOUGH_FREE_MEMORY" => EvacuationReason::NotEnoughMemory,
        "VM_REQUIRES_SR" | "VM_REQUIRES_VDI" => EvacuationReason::LocalStorage,
        "VM_MISSING_PV_DRIVERS" | "VM_LACKS_FEATURE" | "VM_LACKS_FEATURE_SUSPEND" => {
            EvacuationReason::ToolsMissing
        }
        other => EvacuationReason::Other(other.to_string()),
    }
}

#[async_trait]
impl PoolService for XenApiService {
    async fn host_is_live(&self, host: &Host) -> Result<bool, PrecheckError> {
        let metrics: String = self
            .client
            .session_call("host.get_metrics", vec![json!(host.opaque_ref)])
            .await?;
        self.client
            .session_call("host_metrics.get_live", vec![json!(metrics)])
            .await
    }

    async fn ha_enabled(&self, pool: &Pool) -> Result<bool, PrecheckError> {
        self.client
            .session_call("pool.get_ha_enabled", vec![json!(pool.opaque_ref)])
            .await
    }

    async fn unplugged_storage(&self, host: &Host) -> Result<Vec<String>, PrecheckError> {
        let mut unplugged = Vec::new();
        for pbd in self.pbd_records(host).await? {
            if pbd.currently_attached {
                continue;
            }
            let name: String = self
                .client
                .session_call("SR.get_name_label", vec![json!(pbd.sr)])
                .await?;
            unplugged.push(name);
        }
        Ok(unplugged)
    }

    async fn available_disk_space(&self, host: &Host) -> Result<u64, PrecheckError> {
        let output = self
            .call_disk_space_plugin(host, "get_avail_host_disk_space")
            .await?;
        output.trim().parse().map_err(|e| {
            PrecheckError::Internal(format!("Invalid disk space '{}': {}", output.trim(), e))
        })
    }

    async fn precheck_update(
        &self,
        host: &Host,
        payload: &UpdatePayload,
    ) -> Result<LivepatchStatus, PrecheckError> {
        let payload_ref = self.payload_ref(payload).await?;
        match payload {
            UpdatePayload::Update(_) => {
                self.client
                    .session_call(
                        "pool_update.precheck",
                        vec![json!(payload_ref), json!(host.opaque_ref)],
                    )
                    .await
            }
            UpdatePayload::Patch(_) => {
                let _: Value = self
                    .client
                    .session_call(
                        "pool_patch.precheck",
                        vec![json!(payload_ref), json!(host.opaque_ref)],
                    )
                    .await?;
                Ok(LivepatchStatus::Ok)
            }
        }
    }

    async fn evacuation_blockers(&self, host: &Host) -> Result<Vec<EvacuationBlocker>, PrecheckError> {
        let blocking: HashMap<String, Vec<String>> = self
            .client
            .session_call(
                "host.get_vms_which_prevent_evacuation",
                vec![json!(host.opaque_ref)],
            )
            .await?;

        let mut blockers = Vec::with_capacity(blocking.len());
        for (vm_ref, description) in blocking {
            let vm_name: String = self
                .client
                .session_call("VM.get_name_label", vec![json!(vm_ref)])
                .await?;
            let code = description.first().map(String::as_str).unwrap_or_default();
            let mut reason = evacuation_reason(code);
            if reason == EvacuationReason::LocalStorage && !self.inserted_cds(&vm_ref).await?.is_empty() {
                reason = EvacuationReason::CdInserted;
            }
            debug!(host = %host.name, vm = %vm_name, ?reason, "VM prevents evacuation");
            blockers.push(EvacuationBlocker {
                vm_ref,
                vm_name,
                reason,
            });
        }
        blockers.sort_by(|a, b| a.vm_name.cmp(&b.vm_name));
        Ok(blockers)
    }

    async fn disable_ha(&self, pool: &Pool) -> Result<(), PrecheckError> {
        let _: Value = self
            .client
            .session_call("pool.ha_disable", vec![json!(pool.opaque_ref)])
            .await?;
        Ok(())
    }

    async fn plug_storage(&self, host: &Host) -> Result<(), PrecheckError> {
        let pbds: Vec<String> = self
            .client
            .session_call("host.get_PBDs", vec![json!(host.opaque_ref)])
            .await?;
        for pbd in pbds {
            let attached: bool = self
                .client
                .session_call("PBD.get_currently_attached", vec![json!(pbd)])
                .await?;
            if !attached {
                let _: Value = self
                    .client
                    .session_call("PBD.plug", vec![json!(pbd)])
                    .await?;
            }
        }
        Ok(())
    }

    async fn cleanup_disk_space(&self, host: &Host) -> Result<(), PrecheckError> {
        self.call_disk_space_plugin(host, "cleanup_disk_space").await?;
        Ok(())
    }

    async fn eject_cd(&self, vm_ref: &str) -> Result<(), PrecheckError> {
        for vbd in self.inserted_cds(vm_ref).await? {
            let _: Value = self
                .client
                .session_call("VBD.eject", vec![json!(vbd)])
                .await?;
        }
        Ok(())
    }

    async fn is_update_applied(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<bool, PrecheckError> {
        let payload_ref = self.payload_ref(payload).await?;
        match payload {
            UpdatePayload::Update(_) => {
                let hosts: Vec<String> = self
                    .client
                    .session_call("pool_update.get_hosts", vec![json!(payload_ref)])
                    .await?;
                Ok(hosts.contains(&host.opaque_ref))
            }
            UpdatePayload::Patch(_) => {
                let host_patches: Vec<String> = self
                    .client
                    .session_call("host.get_patches", vec![json!(host.opaque_ref)])
                    .await?;
                for host_patch in host_patches {
                    let pool_patch: String = self
                        .client
                        .session_call("host_patch.get_pool_patch", vec![json!(host_patch)])
                        .await?;
                    if pool_patch == payload_ref {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    async fn apply_update(&self, payload: &UpdatePayload, host: &Host) -> Result<(), PrecheckError> {
        let payload_ref = self.payload_ref(payload).await?;
        let method = match payload {
            UpdatePayload::Update(_) => "pool_update.apply",
            UpdatePayload::Patch(_) => "pool_patch.apply",
        };
        let _: Value = self
            .client
            .session_call(method, vec![json!(payload_ref), json!(host.opaque_ref)])
            .await?;
        Ok(())
    }

    async fn apply_update_async(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<TaskRef, PrecheckError> {
        let payload_ref = self.payload_ref(payload).await?;
        let method = match payload {
            UpdatePayload::Update(_) => "Async.pool_update.apply",
            UpdatePayload::Patch(_) => "Async.pool_patch.apply",
        };
        let task: String = self
            .client
            .session_call(method, vec![json!(payload_ref), json!(host.opaque_ref)])
            .await?;
        Ok(TaskRef(task))
    }

    async fn task_record(&self, task: &TaskRef) -> Result<TaskRecord, PrecheckError> {
        self.client
            .session_call("task.get_record", vec![json!(task.0)])
            .await
    }

    async fn destroy_task(&self, task: &TaskRef) -> Result<(), PrecheckError> {
        let _: Value = self
            .client
            .session_call("task.destroy", vec![json!(task.0)])
            .await?;
        Ok(())
    }
}
