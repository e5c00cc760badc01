//! Server-side applicability check

use async_trait::async_trait;
use tracing::debug;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::{Host, UpdatePayload};
use crate::problems::Problem;

/// Ask the host whether the payload can be applied. Records the livepatch
/// outcome for the reboot and evacuation checks of the same run.
pub struct UpdatePrecheckCheck {
    host: Host,
    payload: UpdatePayload,
}

impl UpdatePrecheckCheck {
    pub fn new(host: Host, payload: UpdatePayload) -> Self {
        Self { host, payload }
    }
}

#[async_trait]
impl Check for UpdatePrecheckCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        format!("Checking that {} can be applied", self.payload.name())
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        if ctx.is_known_dead(&self.host.uuid) {
            return Ok(vec![]);
        }

        match ctx.service().precheck_update(&self.host, &self.payload).await {
            Ok(status) => {
                debug!(host = %self.host.name, ?status, "Update precheck passed");
                ctx.set_livepatch_status(&self.host.uuid, status);
                Ok(vec![])
            }
            Err(PrecheckError::NotFound(_)) => Ok(vec![Problem::update_not_found(
                &self.host,
                &self.description(),
                self.payload.uuid(),
            )]),
            Err(PrecheckError::Remote(failure)) => {
                let params = failure.description.iter().skip(1).cloned().collect();
                Ok(vec![Problem::update_precheck_failed(
                    &self.host,
                    &self.description(),
                    failure.code(),
                    params,
                )])
            }
            Err(e) => Err(e),
        }
    }
}
