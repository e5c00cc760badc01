//! Storage connection check

use async_trait::async_trait;

use crate::checks::{Check, CheckContext};
use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;

/// Every storage repository the host uses must be plugged
pub struct StoragePluggedCheck {
    host: Host,
}

impl StoragePluggedCheck {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Check for StoragePluggedCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Checking storage connections".to_string()
    }

    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        if ctx.is_known_dead(&self.host.uuid) {
            return Ok(vec![]);
        }

        let unplugged = ctx.service().unplugged_storage(&self.host).await?;
        if unplugged.is_empty() {
            Ok(vec![])
        } else {
            Ok(vec![Problem::storage_unplugged(
                &self.host,
                &self.description(),
                unplugged,
            )])
        }
    }
}
