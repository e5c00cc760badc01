//! Disk space check for automated updates

use async_trait::async_trait;
use tracing::debug;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;

/// The host must have room for every update queued for it
pub struct DiskSpaceForUpdatesCheck {
    host: Host,
    required: u64,
}

impl DiskSpaceForUpdatesCheck {
    pub fn new(host: Host, required: u64) -> Self {
        Self { host, required }
    }

    /// Bytes the plan requires on the host
    pub fn required(&self) -> u64 {
        self.required
    }
}

#[async_trait]
impl Check for DiskSpaceForUpdatesCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking disk space".to_string()
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        if ctx.is_known_dead(&self.host.uuid) || self.required == 0 {
            return Ok(vec![]);
        }

        let available = ctx.service().available_disk_space(&self.host).await?;
        debug!(host = %self.host.name, required = self.required, available, "Disk space checked");

        if available >= self.required {
            Ok(vec![])
        } else {
            Ok(vec![Problem::insufficient_disk_space(
                &self.host,
                &self.description(),
                self.required,
                available,
            )])
        }
    }
}
