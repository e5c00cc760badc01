//! Synchronous update apply

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::actions::{ActionProgress, AsyncAction};
use crate::errors::PrecheckError;
use crate::models::{Host, UpdatePayload};
use crate::service::PoolService;

/// Applies a list of updates to a list of hosts, one at a time.
///
/// Hosts that already have an update are skipped. Every step is written to
/// an operation log, which is attached to the error when an apply fails.
pub struct ApplyUpdateAction {
    service: Arc<dyn PoolService>,
    updates: Vec<UpdatePayload>,
    hosts: Vec<Host>,
    description: RwLock<String>,
    log: Mutex<Vec<String>>,
}

impl ApplyUpdateAction {
    pub fn new(service: Arc<dyn PoolService>, updates: Vec<UpdatePayload>, hosts: Vec<Host>) -> Self {
        let description = match (updates.as_slice(), hosts.as_slice()) {
            ([update], [host]) => format!("Applying update {} to {}", update.name(), host.name),
            _ => "Applying updates".to_string(),
        };
        Self {
            service,
            updates,
            hosts,
            description: RwLock::new(description),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Lines written so far
    pub fn operation_log(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn append(&self, line: impl Into<String>) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push(line.into());
    }

    fn set_description(&self, description: String) {
        let mut current = self.description.write().unwrap_or_else(|e| e.into_inner());
        *current = description;
    }
}

#[async_trait]
impl AsyncAction for ApplyUpdateAction {
    fn description(&self) -> String {
        self.description
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        let total = (self.updates.len() * self.hosts.len()).max(1);
        let mut step = 0;

        for update in &self.updates {
            for host in &self.hosts {
                if progress.is_cancelled() {
                    return Err(PrecheckError::Cancelled);
                }
                step += 1;

                if self.service.is_update_applied(update, host).await? {
                    debug!(update = %update.name(), host = %host.name, "Update already applied");
                    progress.set((step * 100 / total) as u8);
                    continue;
                }

                let line = format!("Applying update {} to server {}", update.name(), host.name);
                self.append(line.clone());
                self.set_description(line);

                if let Err(e) = self.service.apply_update(update, host).await {
                    if let Some(detail) = e.as_remote().and_then(|f| f.apply_failure_detail()) {
                        self.append("Applying the update failed:");
                        self.append(detail);
                    }
                    error!(
                        update = %update.name(),
                        host = %host.name,
                        log = %self.operation_log().join("\n"),
                        "Failed to apply update: {}",
                        e
                    );
                    return Err(e);
                }

                self.append("done");
                progress.set((step * 100 / total) as u8);
            }
        }

        let description = match (self.updates.as_slice(), self.hosts.as_slice()) {
            ([update], [host]) => format!("Update {} applied to {}", update.name(), host.name),
            _ => "All updates applied".to_string(),
        };
        info!("{}", description);
        self.set_description(description);
        Ok(())
    }
}
