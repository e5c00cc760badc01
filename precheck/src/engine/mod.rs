//! Precheck run engine

pub mod fsm;
pub mod orchestrator;
pub mod report;

pub use fsm::{RunEvent, RunFsm, RunState};
pub use orchestrator::PrecheckOrchestrator;
pub use report::{
    GroupHeader, HostRow, PrecheckReport, ProgressTracker, ReportEvent, ReportGroup, RowIcon,
    RunOutcome,
};
