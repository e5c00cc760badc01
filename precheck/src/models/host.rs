//! Host and pool models

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A pool of hosts sharing one coordinator connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub uuid: String,
    pub name: String,
    pub opaque_ref: String,
    pub master_uuid: String,

    /// Pool generation applies updates atomically per host
    #[serde(default)]
    pub ely_or_greater: bool,
}

/// A hypervisor host targeted by the rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub uuid: String,
    pub name: String,
    pub opaque_ref: String,
    pub pool: Pool,
    pub is_master: bool,
}

impl Host {
    pub fn pool_uuid(&self) -> &str {
        &self.pool.uuid
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Unique pools of the selected hosts, in first-seen order
pub fn selected_pools(hosts: &[Host]) -> Vec<Pool> {
    let mut seen = HashSet::new();
    hosts
        .iter()
        .filter(|h| seen.insert(h.pool.uuid.clone()))
        .map(|h| h.pool.clone())
        .collect()
}
