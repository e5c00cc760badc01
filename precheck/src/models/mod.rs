//! Domain models

pub mod host;
pub mod update;

pub use host::{selected_pools, Host, Pool};
pub use update::{
    Guidance, PoolPatch, PoolUpdate, RebootGuidance, UpdateMode, UpdatePayload, UpgradeSequence,
};
