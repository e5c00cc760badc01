//! Host liveness check

use async_trait::async_trait;
use tracing::debug;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;

/// The host must be reachable and live
pub struct HostLivenessCheck {
    host: Host,
}

impl HostLivenessCheck {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Check for HostLivenessCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking server liveness".to_string()
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        let live = ctx.service().host_is_live(&self.host).await?;
        ctx.set_live(&self.host.uuid, live);
        debug!(host = %self.host.name, live, "Liveness checked");

        if live {
            Ok(vec![])
        } else {
            Ok(vec![Problem::host_not_live(&self.host, &self.description())])
        }
    }
}
