//! Problem remediation

pub mod fixes;
pub mod runner;

pub use fixes::{CleanupDiskSpaceAction, DisableHaAction, EjectCdAction, PlugStorageAction};
pub use runner::{ConfirmFn, Recheck, RemediationRunner, ResolveOutcome};
