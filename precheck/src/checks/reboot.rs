//! Reboot necessity check

use async_trait::async_trait;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::{Host, RebootGuidance};
use crate::problems::Problem;

/// Tell the operator what the host will go through after the update.
///
/// A restart the livepatch outcome made unnecessary is not reported.
pub struct HostNeedsRebootCheck {
    host: Host,
    guidance: RebootGuidance,
}

impl HostNeedsRebootCheck {
    pub fn new(host: Host, guidance: RebootGuidance) -> Self {
        Self { host, guidance }
    }
}

#[async_trait]
impl Check for HostNeedsRebootCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking if the server needs a reboot".to_string()
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        if ctx.is_known_dead(&self.host.uuid) {
            return Ok(vec![]);
        }

        if self.guidance.restart_host && !ctx.livepatch_complete(&self.host.uuid) {
            return Ok(vec![Problem::reboot_required(&self.host, &self.description())]);
        }

        if self.guidance.restart_toolstack {
            return Ok(vec![Problem::toolstack_restart_required(
                &self.host,
                &self.description(),
            )]);
        }

        Ok(vec![])
    }
}
