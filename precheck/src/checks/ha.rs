//! High availability check

use async_trait::async_trait;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;

/// HA must be off on the pool while updates are applied. Bound to the pool
/// master, so it runs once per pool.
pub struct HaOffCheck {
    host: Host,
}

impl HaOffCheck {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Check for HaOffCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking HA status".to_string()
    }

    fn successful_description(&self) -> Option<String> {
        Some(format!("{}: HA is off.", self.host.pool.name))
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        if ctx.is_known_dead(&self.host.uuid) {
            return Ok(vec![]);
        }

        if ctx.service().ha_enabled(&self.host.pool).await? {
            Ok(vec![Problem::ha_enabled(&self.host, &self.description())])
        } else {
            Ok(vec![])
        }
    }
}
