//! Asynchronous pool update apply on one host

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::actions::{ActionProgress, AsyncAction};
use crate::errors::{PrecheckError, RemoteFailure};
use crate::models::{Host, UpdatePayload};
use crate::service::{PoolService, TaskRef, TaskStatusType};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Starts the apply as a server task, polls it to a terminal state and
/// destroys it, whatever the outcome.
pub struct ApplyPoolUpdatePlanAction {
    service: Arc<dyn PoolService>,
    host: Host,
    update: UpdatePayload,
    cooldown: CooldownOptions,
}

impl ApplyPoolUpdatePlanAction {
    pub fn new(service: Arc<dyn PoolService>, host: Host, update: UpdatePayload) -> Self {
        Self {
            service,
            host,
            update,
            cooldown: CooldownOptions::default(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: CooldownOptions) -> Self {
        self.cooldown = cooldown;
        self
    }

    async fn poll(&self, task: &TaskRef, progress: &ActionProgress) -> Result<(), PrecheckError> {
        let mut attempt = 0;
        loop {
            let record = self.service.task_record(task).await?;
            progress.set((record.progress.clamp(0.0, 1.0) * 100.0) as u8);

            match record.status {
                TaskStatusType::Success => return Ok(()),
                TaskStatusType::Failure => {
                    return Err(PrecheckError::Remote(RemoteFailure::new(record.error_info)))
                }
                TaskStatusType::Cancelled => return Err(PrecheckError::Cancelled),
                TaskStatusType::Pending | TaskStatusType::Cancelling => {
                    let delay = calc_exp_backoff(&self.cooldown, attempt);
                    debug!(task = %task, attempt, ?delay, "Task still running");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[async_trait]
impl AsyncAction for ApplyPoolUpdatePlanAction {
    fn description(&self) -> String {
        format!("Applying update {} to {}", self.update.name(), self.host.name)
    }

    /// The server task runs to completion once submitted
    fn can_cancel(&self) -> bool {
        false
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        let task = self
            .service
            .apply_update_async(&self.update, &self.host)
            .await?;
        debug!(task = %task, host = %self.host.name, update = %self.update.name(), "Apply task started");

        let result = self.poll(&task, progress).await;

        if let Err(e) = self.service.destroy_task(&task).await {
            warn!(task = %task, "Failed to destroy task: {}", e);
        }
        result
    }
}
