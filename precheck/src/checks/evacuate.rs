//! Evacuation feasibility check

use async_trait::async_trait;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;

/// Every VM on the host must be able to move elsewhere before the restart
pub struct AssertCanEvacuateCheck {
    host: Host,
}

impl AssertCanEvacuateCheck {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Check for AssertCanEvacuateCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking that the server can be evacuated".to_string()
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        // no restart, nothing to evacuate
        if ctx.is_known_dead(&self.host.uuid) || ctx.livepatch_complete(&self.host.uuid) {
            return Ok(vec![]);
        }

        let description = self.description();
        let blockers = ctx.service().evacuation_blockers(&self.host).await?;
        Ok(blockers
            .iter()
            .map(|blocker| Problem::evacuation_blocked(&self.host, &description, blocker))
            .collect())
    }
}
