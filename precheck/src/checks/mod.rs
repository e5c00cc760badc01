//! Precheck implementations
//!
//! A check validates one host and returns the problems it found. Checks are
//! built by the plan builder and run one at a time by the orchestrator; the
//! only state they share is the per-run [`CheckContext`].

pub mod disk_space;
pub mod evacuate;
pub mod ha;
pub mod liveness;
pub mod reboot;
pub mod server_side;
pub mod storage;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::errors::PrecheckError;
use crate::models::Host;
use crate::problems::Problem;
use crate::service::{LivepatchStatus, PoolService};

pub use disk_space::DiskSpaceForUpdatesCheck;
pub use evacuate::AssertCanEvacuateCheck;
pub use ha::HaOffCheck;
pub use liveness::HostLivenessCheck;
pub use reboot::HostNeedsRebootCheck;
pub use server_side::UpdatePrecheckCheck;
pub use storage::StoragePluggedCheck;

/// A validation unit targeting one host
#[async_trait]
pub trait Check: Send + Sync {
    /// Host the check is bound to
    fn host(&self) -> &Host;

    /// What the check verifies
    fn description(&self) -> String;

    /// Text of the OK row, when the check has something better to say than
    /// "<host>: <description> ok."
    fn successful_description(&self) -> Option<String> {
        None
    }

    /// Run the check. An empty list means the host passed.
    async fn run_all_checks(&self, ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError>;
}

/// State shared by the checks of a single run
pub struct CheckContext {
    service: Arc<dyn PoolService>,
    livepatch_codes: RwLock<HashMap<String, LivepatchStatus>>,
    liveness: RwLock<HashMap<String, bool>>,
}

impl CheckContext {
    pub fn new(service: Arc<dyn PoolService>) -> Self {
        Self {
            service,
            livepatch_codes: RwLock::new(HashMap::new()),
            liveness: RwLock::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &dyn PoolService {
        self.service.as_ref()
    }

    /// Livepatch outcome of the server-side precheck, if it ran for the host
    pub fn livepatch_status(&self, host_uuid: &str) -> Option<LivepatchStatus> {
        let codes = self.livepatch_codes.read().unwrap_or_else(|e| e.into_inner());
        codes.get(host_uuid).copied()
    }

    pub fn set_livepatch_status(&self, host_uuid: &str, status: LivepatchStatus) {
        let mut codes = self.livepatch_codes.write().unwrap_or_else(|e| e.into_inner());
        codes.insert(host_uuid.to_string(), status);
    }

    /// Whether the update can be applied without restarting the host
    pub fn livepatch_complete(&self, host_uuid: &str) -> bool {
        self.livepatch_status(host_uuid) == Some(LivepatchStatus::OkLivepatchComplete)
    }

    pub fn set_live(&self, host_uuid: &str, live: bool) {
        let mut liveness = self.liveness.write().unwrap_or_else(|e| e.into_inner());
        liveness.insert(host_uuid.to_string(), live);
    }

    /// True only when the liveness check has seen the host down in this run
    pub fn is_known_dead(&self, host_uuid: &str) -> bool {
        let liveness = self.liveness.read().unwrap_or_else(|e| e.into_inner());
        liveness.get(host_uuid) == Some(&false)
    }
}

/// Default text of an OK row
pub fn default_ok_text(check: &dyn Check) -> String {
    format!("{}: {} ok.", check.host().name, check.description())
}
