//! Problems raised by prechecks

pub mod ledger;

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::models::{Host, Pool};
use crate::service::{EvacuationBlocker, EvacuationReason};
use crate::utils::format_bytes;

pub use ledger::ProblemLedger;

/// Severity class of a problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Information,
    Warning,
    Failure,
}

/// Result of a row or a whole check group, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrecheckResult {
    Ok,
    Info,
    Warning,
    Failed,
}

impl PrecheckResult {
    pub fn label(&self) -> &'static str {
        match self {
            PrecheckResult::Ok => "OK",
            PrecheckResult::Info => "Information",
            PrecheckResult::Warning => "Warning",
            PrecheckResult::Failed => "Failed",
        }
    }
}

impl From<Severity> for PrecheckResult {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Information => PrecheckResult::Info,
            Severity::Warning => PrecheckResult::Warning,
            Severity::Failure => PrecheckResult::Failed,
        }
    }
}

/// Problem variants, each with its own payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    Failure,
    Warning,
    Information,
    WarningWithLink { url: String, link_text: String },
    ProblemWithLink { url: String, link_text: String },
}

impl ProblemKind {
    pub fn severity(&self) -> Severity {
        match self {
            ProblemKind::Failure | ProblemKind::ProblemWithLink { .. } => Severity::Failure,
            ProblemKind::Warning | ProblemKind::WarningWithLink { .. } => Severity::Warning,
            ProblemKind::Information => Severity::Information,
        }
    }

    pub fn link(&self) -> Option<(&str, &str)> {
        match self {
            ProblemKind::WarningWithLink { url, link_text }
            | ProblemKind::ProblemWithLink { url, link_text } => {
                Some((url.as_str(), link_text.as_str()))
            }
            _ => None,
        }
    }
}

/// The semantic condition behind a problem. Together with the host it is
/// the problem's identity across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemCondition {
    HostNotLive,
    HaEnabled { pool_uuid: String },
    StorageUnplugged { storage: Vec<String> },
    InsufficientDiskSpace { required: u64 },
    UpdateNotFound { update_uuid: String },
    UpdatePrecheckFailed { code: String, params: Vec<String> },
    RebootRequired,
    ToolstackRestartRequired,
    EvacuationBlocked { vm_ref: String, reason: EvacuationReason },
}

/// Automatic remediation a problem offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    DisableHa(Pool),
    PlugStorage(Host),
    CleanupDiskSpace(Host),
    EjectCd { vm_ref: String, vm_name: String },
}

impl Fix {
    /// Fixes that change pool-wide behavior ask before running
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Fix::DisableHa(_))
    }
}

/// A validation outcome raised by a check against one host
#[derive(Debug)]
pub struct Problem {
    host: Host,
    check_description: String,
    condition: ProblemCondition,
    kind: ProblemKind,
    description: String,
    help_message: Option<String>,
    fix: Option<Fix>,
    enabled: AtomicBool,
}

impl Problem {
    pub fn new(
        host: &Host,
        check_description: impl Into<String>,
        condition: ProblemCondition,
        kind: ProblemKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            host: host.clone(),
            check_description: check_description.into(),
            condition,
            kind,
            description: description.into(),
            help_message: None,
            fix: None,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn with_help(mut self, help_message: impl Into<String>) -> Self {
        self.help_message = Some(help_message.into());
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    // ------------------------------------------------------------------ //

    pub fn host_not_live(host: &Host, check: &str) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::HostNotLive,
            ProblemKind::Failure,
            format!("{}: the server is not live", host.name),
        )
        .with_help("Power on the server")
    }

    pub fn ha_enabled(host: &Host, check: &str) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::HaEnabled {
                pool_uuid: host.pool.uuid.clone(),
            },
            ProblemKind::Failure,
            format!("{}: high availability is enabled", host.pool.name),
        )
        .with_help("Turn HA off")
        .with_fix(Fix::DisableHa(host.pool.clone()))
    }

    pub fn storage_unplugged(host: &Host, check: &str, storage: Vec<String>) -> Self {
        let description = format!(
            "{}: storage is not connected: {}",
            host.name,
            storage.join(", ")
        );
        Self::new(
            host,
            check,
            ProblemCondition::StorageUnplugged { storage },
            ProblemKind::Failure,
            description,
        )
        .with_help("Repair storage")
        .with_fix(Fix::PlugStorage(host.clone()))
    }

    pub fn insufficient_disk_space(host: &Host, check: &str, required: u64, available: u64) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::InsufficientDiskSpace { required },
            ProblemKind::Failure,
            format!(
                "{}: not enough disk space to install the updates ({} required, {} available)",
                host.name,
                format_bytes(required),
                format_bytes(available)
            ),
        )
        .with_help("Clean up")
        .with_fix(Fix::CleanupDiskSpace(host.clone()))
    }

    pub fn update_not_found(host: &Host, check: &str, update_uuid: &str) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::UpdateNotFound {
                update_uuid: update_uuid.to_string(),
            },
            ProblemKind::Failure,
            format!("{}: the update has not been uploaded to this server", host.name),
        )
    }

    pub fn update_precheck_failed(host: &Host, check: &str, code: &str, params: Vec<String>) -> Self {
        let description = if params.is_empty() {
            format!("{}: the update precheck failed ({})", host.name, code)
        } else {
            format!(
                "{}: the update precheck failed ({}: {})",
                host.name,
                code,
                params.join(", ")
            )
        };
        let kind = match code {
            "LICENCE_RESTRICTION" => ProblemKind::ProblemWithLink {
                url: "https://docs.xenserver.com/en-us/xenserver/8/licensing".to_string(),
                link_text: "Licensing information".to_string(),
            },
            _ => ProblemKind::Failure,
        };
        let problem = Self::new(
            host,
            check,
            ProblemCondition::UpdatePrecheckFailed {
                code: code.to_string(),
                params,
            },
            kind,
            description,
        );
        match code {
            "UPDATE_PRECHECK_FAILED_OUT_OF_SPACE" => problem
                .with_help("Clean up")
                .with_fix(Fix::CleanupDiskSpace(host.clone())),
            _ => problem,
        }
    }

    pub fn reboot_required(host: &Host, check: &str) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::RebootRequired,
            ProblemKind::Information,
            format!("{}: the server will be rebooted after the update is applied", host.name),
        )
    }

    pub fn toolstack_restart_required(host: &Host, check: &str) -> Self {
        Self::new(
            host,
            check,
            ProblemCondition::ToolstackRestartRequired,
            ProblemKind::Information,
            format!("{}: the toolstack will be restarted after the update is applied", host.name),
        )
    }

    pub fn evacuation_blocked(host: &Host, check: &str, blocker: &EvacuationBlocker) -> Self {
        let condition = ProblemCondition::EvacuationBlocked {
            vm_ref: blocker.vm_ref.clone(),
            reason: blocker.reason.clone(),
        };
        let vm = &blocker.vm_name;
        match &blocker.reason {
            EvacuationReason::CdInserted => Self::new(
                host,
                check,
                condition,
                ProblemKind::Failure,
                format!("{}: VM '{}' has a CD inserted and cannot be migrated", host.name, vm),
            )
            .with_help("Eject CD")
            .with_fix(Fix::EjectCd {
                vm_ref: blocker.vm_ref.clone(),
                vm_name: vm.clone(),
            }),
            EvacuationReason::LocalStorage => Self::new(
                host,
                check,
                condition,
                ProblemKind::ProblemWithLink {
                    url: "https://docs.xenserver.com/en-us/xenserver/8/vms/migrate".to_string(),
                    link_text: "Migration requirements".to_string(),
                },
                format!("{}: VM '{}' uses storage only this server can reach", host.name, vm),
            ),
            EvacuationReason::NotEnoughMemory => Self::new(
                host,
                check,
                condition,
                ProblemKind::Failure,
                format!("{}: no other server has enough free memory for VM '{}'", host.name, vm),
            )
            .with_help("Shut down or suspend the VM"),
            EvacuationReason::ToolsMissing => Self::new(
                host,
                check,
                condition,
                ProblemKind::WarningWithLink {
                    url: "https://docs.xenserver.com/en-us/xenserver/8/vms/windows/vm-tools"
                        .to_string(),
                    link_text: "Install guest tools".to_string(),
                },
                format!("{}: VM '{}' has no guest tools and will be shut down", host.name, vm),
            ),
            EvacuationReason::Other(code) => Self::new(
                host,
                check,
                condition,
                ProblemKind::Failure,
                format!("{}: VM '{}' cannot be migrated ({})", host.name, vm, code),
            ),
        }
    }

    // ------------------------------------------------------------------ //

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn check_description(&self) -> &str {
        &self.check_description
    }

    pub fn condition(&self) -> &ProblemCondition {
        &self.condition
    }

    pub fn kind(&self) -> &ProblemKind {
        &self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn help_message(&self) -> Option<&str> {
        self.help_message.as_deref()
    }

    pub fn fix(&self) -> Option<&Fix> {
        self.fix.as_ref()
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn precheck_result(&self) -> PrecheckResult {
        self.severity().into()
    }

    /// Warnings and information do not block the rollout
    pub fn is_problem(&self) -> bool {
        self.severity() == Severity::Failure
    }

    pub fn is_fixable(&self) -> bool {
        self.fix.is_some()
    }

    pub fn is_host_not_live(&self) -> bool {
        self.condition == ProblemCondition::HostNotLive
    }

    /// Text shown in the solution column: the link text for link problems,
    /// the help message otherwise
    pub fn solution_text(&self) -> String {
        match self.kind.link() {
            Some((_, link_text)) => link_text.to_string(),
            None => self.help_message.clone().unwrap_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl PartialEq for Problem {
    fn eq(&self, other: &Self) -> bool {
        self.host.uuid == other.host.uuid && self.condition == other.condition
    }
}

impl Eq for Problem {}

impl Hash for Problem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.uuid.hash(state);
        self.condition.hash(state);
    }
}
