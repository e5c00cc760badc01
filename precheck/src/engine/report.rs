//! Report rows and run events
//!
//! The orchestrator emits [`ReportEvent`]s in check execution order. A
//! consumer can replay them into a [`PrecheckReport`], which is what the
//! session exposes as the current row snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checks::{default_ok_text, Check};
use crate::problems::{PrecheckResult, Problem};

const ROW_INDENT: &str = "    ";

/// Icon classification of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowIcon {
    Ok,
    Info,
    Warning,
    Error,
}

impl From<PrecheckResult> for RowIcon {
    fn from(result: PrecheckResult) -> Self {
        match result {
            PrecheckResult::Ok => RowIcon::Ok,
            PrecheckResult::Info => RowIcon::Info,
            PrecheckResult::Warning => RowIcon::Warning,
            PrecheckResult::Failed => RowIcon::Error,
        }
    }
}

/// Result row of one check for one host
#[derive(Debug, Clone)]
pub struct HostRow {
    pub host_uuid: String,
    pub host_name: String,
    /// Indented description text
    pub description: String,
    /// Solution or help text, empty for OK rows
    pub solution: String,
    pub problem: Option<Arc<Problem>>,
}

impl HostRow {
    /// Synthetic row of a check that raised nothing
    pub fn ok(check: &dyn Check) -> Self {
        let text = check
            .successful_description()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| default_ok_text(check));
        Self {
            host_uuid: check.host().uuid.clone(),
            host_name: check.host().name.clone(),
            description: format!("{}{}", ROW_INDENT, text),
            solution: String::new(),
            problem: None,
        }
    }

    pub fn from_problem(problem: Arc<Problem>) -> Self {
        Self {
            host_uuid: problem.host().uuid.clone(),
            host_name: problem.host().name.clone(),
            description: format!("{}{}", ROW_INDENT, problem.description()),
            solution: problem.solution_text(),
            problem: Some(problem),
        }
    }

    pub fn result(&self) -> PrecheckResult {
        self.problem
            .as_ref()
            .map(|p| p.precheck_result())
            .unwrap_or(PrecheckResult::Ok)
    }

    pub fn icon(&self) -> RowIcon {
        self.result().into()
    }

    /// Blocking rows: failures and link problems, not warnings or information
    pub fn is_problem(&self) -> bool {
        self.problem.as_ref().is_some_and(|p| p.is_problem())
    }

    pub fn is_fixable(&self) -> bool {
        self.problem.as_ref().is_some_and(|p| p.is_fixable()) && !self.solution.is_empty()
    }

    /// Whether the solution can be triggered right now. OK rows never can.
    pub fn enabled(&self) -> bool {
        self.problem.as_ref().is_some_and(|p| p.enabled())
    }
}

/// Header of a check group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHeader {
    pub index: usize,
    pub title: String,
    /// Aggregate result, set once the group finished
    pub result: Option<PrecheckResult>,
}

impl GroupHeader {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            result: None,
        }
    }

    pub fn text(&self) -> String {
        match self.result {
            Some(result) => format!("{} {}", self.title, result.label()),
            None => self.title.clone(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Record on the reporting channel
#[derive(Debug, Clone)]
pub enum ReportEvent {
    RunStarted { run_id: String },
    GroupStarted { header: GroupHeader, progress: u8 },
    Row { group: usize, row: HostRow, progress: u8 },
    GroupFinished { header: GroupHeader },
    RunFinished { run_id: String, outcome: RunOutcome },
}

/// One group as displayed
#[derive(Debug, Clone)]
pub struct ReportGroup {
    pub header: GroupHeader,
    pub rows: Vec<HostRow>,
}

/// Rows of the current run, rebuilt from events
#[derive(Debug, Clone, Default)]
pub struct PrecheckReport {
    pub groups: Vec<ReportGroup>,
    pub progress: u8,
    pub outcome: Option<RunOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PrecheckReport {
    pub fn apply(&mut self, event: &ReportEvent) {
        match event {
            ReportEvent::RunStarted { .. } => {
                self.groups.clear();
                self.progress = 0;
                self.outcome = None;
                self.started_at = Some(Utc::now());
                self.finished_at = None;
            }
            ReportEvent::GroupStarted { header, progress } => {
                self.groups.push(ReportGroup {
                    header: header.clone(),
                    rows: Vec::new(),
                });
                self.progress = *progress;
            }
            ReportEvent::Row {
                group,
                row,
                progress,
            } => {
                if let Some(g) = self.groups.iter_mut().find(|g| g.header.index == *group) {
                    g.rows.push(row.clone());
                }
                self.progress = *progress;
            }
            ReportEvent::GroupFinished { header } => {
                if let Some(g) = self
                    .groups
                    .iter_mut()
                    .find(|g| g.header.index == header.index)
                {
                    g.header = header.clone();
                }
            }
            ReportEvent::RunFinished { outcome, .. } => {
                if *outcome == RunOutcome::Completed {
                    self.progress = 100;
                }
                self.outcome = Some(*outcome);
                self.finished_at = Some(Utc::now());
            }
        }
    }

    /// Wall time of the run, once it finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &HostRow> {
        self.groups.iter().flat_map(|g| g.rows.iter())
    }

    pub fn has_problems(&self) -> bool {
        self.rows().any(HostRow::is_problem)
    }

    /// At least one problem row, and every problem row fixable
    pub fn resolve_all_enabled(&self) -> bool {
        let mut problems = self.rows().filter(|r| r.is_problem()).peekable();
        problems.peek().is_some() && problems.all(HostRow::is_fixable)
    }

    /// Groups with only the rows the view shows. Headers are always kept.
    pub fn visible(&self, failures_only: bool) -> Vec<ReportGroup> {
        self.groups
            .iter()
            .map(|g| ReportGroup {
                header: g.header.clone(),
                rows: g
                    .rows
                    .iter()
                    .filter(|r| !failures_only || r.problem.is_some())
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    /// Problems behind the fixable rows, deduplicated
    pub fn fixable_problems(&self) -> Vec<Arc<Problem>> {
        let mut problems: Vec<Arc<Problem>> = Vec::new();
        for row in self.rows().filter(|r| r.is_fixable()) {
            if let Some(p) = &row.problem {
                if !problems.iter().any(|q| Arc::ptr_eq(q, p)) {
                    problems.push(p.clone());
                }
            }
        }
        problems
    }
}

/// Progress of a run over its groups.
///
/// Each group gets an even share; its header takes 5% of the share at once,
/// the rest fills as its checks complete, scaled by the number of hosts.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    share: f64,
    hosts: usize,
    group_start: f64,
    current: f64,
}

impl ProgressTracker {
    pub fn new(groups: usize, hosts: usize) -> Self {
        let share = if groups == 0 { 100.0 } else { 100.0 / groups as f64 };
        Self {
            share,
            hosts: hosts.max(1),
            group_start: 0.0,
            current: 0.0,
        }
    }

    pub fn start_group(&mut self, index: usize) -> u8 {
        self.group_start = self.share * index as f64;
        self.current = self.group_start + self.share * 0.05;
        self.percent()
    }

    /// Progress after check `check_index` of the current group completed
    pub fn check_done(&mut self, check_index: usize) -> u8 {
        let fraction = ((check_index + 1) as f64 / self.hosts as f64).min(1.0);
        let value = self.group_start + self.share * (0.05 + 0.95 * fraction);
        self.current = value.max(self.current).min(self.group_start + self.share);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        self.current.round().clamp(0.0, 100.0) as u8
    }
}
