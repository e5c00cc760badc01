//! In-memory pool service

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use patch_precheck::errors::{PrecheckError, RemoteFailure};
use patch_precheck::models::{Host, Pool, PoolUpdate, UpdatePayload};
use patch_precheck::service::{
    EvacuationBlocker, LivepatchStatus, PoolService, TaskRecord, TaskRef, TaskStatusType,
};

pub fn pool(uuid: &str) -> Pool {
    Pool {
        uuid: uuid.to_string(),
        name: format!("{}-name", uuid),
        opaque_ref: format!("OpaqueRef:{}", uuid),
        master_uuid: format!("{}-master", uuid),
        ely_or_greater: false,
    }
}

pub fn host(uuid: &str, pool: &Pool, is_master: bool) -> Host {
    Host {
        uuid: uuid.to_string(),
        name: uuid.to_string(),
        opaque_ref: format!("OpaqueRef:{}", uuid),
        pool: pool.clone(),
        is_master,
    }
}

/// A coordinator and one member in the same pool
pub fn two_hosts() -> Vec<Host> {
    let p = pool("pool-a");
    vec![host("h1", &p, true), host("h2", &p, false)]
}

pub fn update(uuid: &str, size: u64) -> PoolUpdate {
    PoolUpdate {
        uuid: uuid.to_string(),
        name: format!("{}-name", uuid),
        installation_size: size,
        after_apply_guidance: vec![],
    }
}

/// Everything the mock answers with, keyed by host or pool uuid
#[derive(Debug, Default)]
pub struct MockState {
    pub dead_hosts: HashSet<String>,
    pub ha_pools: HashSet<String>,
    pub unplugged: HashMap<String, Vec<String>>,
    pub disk_space: HashMap<String, u64>,
    pub precheck_failures: HashMap<String, Vec<String>>,
    pub livepatch: HashMap<String, LivepatchStatus>,
    pub missing_update: HashSet<String>,
    pub blockers: HashMap<String, Vec<EvacuationBlocker>>,
    pub applied: HashSet<(String, String)>,
    pub apply_failures: HashMap<String, Vec<String>>,
    pub failing_fixes: HashSet<String>,
    pub broken_hosts: HashSet<String>,
    pub live_delay: Option<Duration>,
    pub fix_delay: Option<Duration>,
    pub task_polls: HashMap<String, u32>,
    pub destroyed_tasks: Vec<String>,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct MockPool {
    state: Mutex<MockState>,
}

impl MockPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Edit the mock's answers
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self, name: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.as_str() == name).count())
    }

    fn record(&self, name: &str) {
        self.with(|s| s.calls.push(name.to_string()));
    }

    async fn fix(&self, name: &str) -> Result<(), PrecheckError> {
        self.record(name);
        if let Some(delay) = self.with(|s| s.fix_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.with(|s| s.failing_fixes.contains(name)) {
            return Err(PrecheckError::Remote(RemoteFailure::new(vec![format!(
                "{}_FAILED",
                name.to_uppercase()
            )])));
        }
        Ok(())
    }

    fn ensure_reachable(&self, host: &Host) -> Result<(), PrecheckError> {
        if self.with(|s| s.broken_hosts.contains(&host.uuid)) {
            return Err(PrecheckError::SessionError(format!("{} unreachable", host.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl PoolService for MockPool {
    async fn host_is_live(&self, host: &Host) -> Result<bool, PrecheckError> {
        self.record("host_is_live");
        if let Some(delay) = self.with(|s| s.live_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(!self.with(|s| s.dead_hosts.contains(&host.uuid)))
    }

    async fn ha_enabled(&self, pool: &Pool) -> Result<bool, PrecheckError> {
        self.record("ha_enabled");
        Ok(self.with(|s| s.ha_pools.contains(&pool.uuid)))
    }

    async fn unplugged_storage(&self, host: &Host) -> Result<Vec<String>, PrecheckError> {
        self.record("unplugged_storage");
        self.ensure_reachable(host)?;
        Ok(self.with(|s| s.unplugged.get(&host.uuid).cloned().unwrap_or_default()))
    }

    async fn available_disk_space(&self, host: &Host) -> Result<u64, PrecheckError> {
        self.record("available_disk_space");
        Ok(self.with(|s| s.disk_space.get(&host.uuid).copied().unwrap_or(u64::MAX)))
    }

    async fn precheck_update(
        &self,
        host: &Host,
        _payload: &UpdatePayload,
    ) -> Result<LivepatchStatus, PrecheckError> {
        self.record("precheck_update");
        self.with(|s| {
            if s.missing_update.contains(&host.uuid) {
                return Err(PrecheckError::NotFound(host.uuid.clone()));
            }
            if let Some(failure) = s.precheck_failures.get(&host.uuid) {
                return Err(PrecheckError::Remote(RemoteFailure::new(failure.clone())));
            }
            Ok(s.livepatch
                .get(&host.uuid)
                .copied()
                .unwrap_or(LivepatchStatus::Ok))
        })
    }

    async fn evacuation_blockers(
        &self,
        host: &Host,
    ) -> Result<Vec<EvacuationBlocker>, PrecheckError> {
        self.record("evacuation_blockers");
        Ok(self.with(|s| s.blockers.get(&host.uuid).cloned().unwrap_or_default()))
    }

    async fn disable_ha(&self, pool: &Pool) -> Result<(), PrecheckError> {
        self.fix("disable_ha").await?;
        self.with(|s| s.ha_pools.remove(&pool.uuid));
        Ok(())
    }

    async fn plug_storage(&self, host: &Host) -> Result<(), PrecheckError> {
        self.fix("plug_storage").await?;
        self.with(|s| s.unplugged.remove(&host.uuid));
        Ok(())
    }

    async fn cleanup_disk_space(&self, host: &Host) -> Result<(), PrecheckError> {
        self.fix("cleanup_disk_space").await?;
        self.with(|s| s.disk_space.remove(&host.uuid));
        Ok(())
    }

    async fn eject_cd(&self, vm_ref: &str) -> Result<(), PrecheckError> {
        self.fix("eject_cd").await?;
        self.with(|s| {
            for blockers in s.blockers.values_mut() {
                blockers.retain(|b| b.vm_ref != vm_ref);
            }
        });
        Ok(())
    }

    async fn is_update_applied(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<bool, PrecheckError> {
        self.record("is_update_applied");
        Ok(self.with(|s| {
            s.applied
                .contains(&(payload.uuid().to_string(), host.uuid.clone()))
        }))
    }

    async fn apply_update(&self, payload: &UpdatePayload, host: &Host) -> Result<(), PrecheckError> {
        self.record("apply_update");
        self.with(|s| {
            if let Some(failure) = s.apply_failures.get(&host.uuid) {
                return Err(PrecheckError::Remote(RemoteFailure::new(failure.clone())));
            }
            s.applied
                .insert((payload.uuid().to_string(), host.uuid.clone()));
            Ok(())
        })
    }

    async fn apply_update_async(
        &self,
        payload: &UpdatePayload,
        host: &Host,
    ) -> Result<TaskRef, PrecheckError> {
        self.record("apply_update_async");
        Ok(TaskRef(format!("task:{}:{}", payload.uuid(), host.uuid)))
    }

    /// First poll reports the task pending, the second its outcome
    async fn task_record(&self, task: &TaskRef) -> Result<TaskRecord, PrecheckError> {
        self.record("task_record");
        self.with(|s| {
            let polls = s.task_polls.entry(task.0.clone()).or_insert(0);
            *polls += 1;
            let first = *polls == 1;

            let mut parts = task.0.splitn(3, ':');
            let _ = parts.next();
            let update_uuid = parts.next().unwrap_or_default().to_string();
            let host_uuid = parts.next().unwrap_or_default().to_string();

            let (status, progress, error_info) = if first {
                (TaskStatusType::Pending, 0.5, vec![])
            } else if let Some(failure) = s.apply_failures.get(&host_uuid) {
                (TaskStatusType::Failure, 1.0, failure.clone())
            } else {
                s.applied.insert((update_uuid, host_uuid));
                (TaskStatusType::Success, 1.0, vec![])
            };

            Ok(TaskRecord {
                uuid: task.0.clone(),
                status,
                progress,
                result: String::new(),
                error_info,
            })
        })
    }

    async fn destroy_task(&self, task: &TaskRef) -> Result<(), PrecheckError> {
        self.record("destroy_task");
        self.with(|s| s.destroyed_tasks.push(task.0.clone()));
        Ok(())
    }
}
