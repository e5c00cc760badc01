//! Precheck orchestrator
//!
//! Runs a [`CheckPlan`] on a spawned task, one check at a time, feeding
//! problems through the ledger and reporting rows in execution order.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::checks::CheckContext;
use crate::engine::fsm::{RunEvent, RunFsm, RunState};
use crate::engine::report::{
    GroupHeader, HostRow, PrecheckReport, ProgressTracker, ReportEvent, RunOutcome,
};
use crate::errors::PrecheckError;
use crate::plan::CheckPlan;
use crate::problems::{PrecheckResult, ProblemLedger};
use crate::service::PoolService;
use crate::utils::CancelFlag;

struct RunHandle {
    run_id: String,
    join: JoinHandle<Result<RunOutcome, PrecheckError>>,
}

/// Executes check plans
pub struct PrecheckOrchestrator {
    service: Arc<dyn PoolService>,
    ledger: Arc<ProblemLedger>,
    events: mpsc::UnboundedSender<ReportEvent>,
    fsm: Arc<RwLock<RunFsm>>,
    report: Arc<std::sync::RwLock<PrecheckReport>>,
    cancel: std::sync::RwLock<CancelFlag>,
    current: Mutex<Option<RunHandle>>,
}

impl PrecheckOrchestrator {
    pub fn new(
        service: Arc<dyn PoolService>,
        ledger: Arc<ProblemLedger>,
        events: mpsc::UnboundedSender<ReportEvent>,
    ) -> Self {
        Self {
            service,
            ledger,
            events,
            fsm: Arc::new(RwLock::new(RunFsm::new())),
            report: Arc::new(std::sync::RwLock::new(PrecheckReport::default())),
            cancel: std::sync::RwLock::new(CancelFlag::new()),
            current: Mutex::new(None),
        }
    }

    /// Start a run. A run still in progress is cancelled and awaited first.
    pub async fn start(&self, plan: CheckPlan) -> Result<String, PrecheckError> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            debug!(run_id = %previous.run_id, "Cancelling previous run");
            self.cancel_flag().cancel();
            match previous.join.await {
                Ok(Ok(outcome)) => debug!(run_id = %previous.run_id, ?outcome, "Previous run ended"),
                Ok(Err(e)) => warn!(run_id = %previous.run_id, "Previous run failed: {}", e),
                Err(e) => {
                    self.settle_panicked(&previous.run_id, &e).await;
                }
            }
        }

        {
            let mut fsm = self.fsm.write().await;
            fsm.process(RunEvent::Start)
                .map_err(PrecheckError::RunStateError)?;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancelFlag::new();
        {
            let mut flag = self.cancel.write().unwrap_or_else(|e| e.into_inner());
            *flag = cancel.clone();
        }

        info!(
            run_id = %run_id,
            groups = plan.groups.len(),
            checks = plan.check_count(),
            "Starting precheck run"
        );

        let task = RunTask {
            run_id: run_id.clone(),
            service: self.service.clone(),
            ledger: self.ledger.clone(),
            events: self.events.clone(),
            fsm: self.fsm.clone(),
            report: self.report.clone(),
            cancel,
        };
        let join = tokio::spawn(async move { task.execute(plan).await });

        *current = Some(RunHandle {
            run_id: run_id.clone(),
            join,
        });
        Ok(run_id)
    }

    /// Request cancellation; the run stops at the next check boundary
    pub fn cancel(&self) {
        self.cancel_flag().cancel();
    }

    /// Wait for the current run to end.
    ///
    /// A check error that aborted the run is returned as `Err`.
    pub async fn wait(&self) -> Result<RunOutcome, PrecheckError> {
        let mut current = self.current.lock().await;
        let Some(handle) = current.take() else {
            return match self.state().await {
                RunState::Completed => Ok(RunOutcome::Completed),
                RunState::Cancelled => Ok(RunOutcome::Cancelled),
                RunState::Failed => Ok(RunOutcome::Failed),
                state => Err(PrecheckError::RunStateError(format!(
                    "No run to wait for in state {:?}",
                    state
                ))),
            };
        };

        match handle.join.await {
            Ok(result) => result,
            Err(e) => {
                self.settle_panicked(&handle.run_id, &e).await;
                Err(e.into())
            }
        }
    }

    pub async fn state(&self) -> RunState {
        self.fsm.read().await.state().clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == RunState::Running
    }

    /// Rows reported so far by the current or last run
    pub fn report_snapshot(&self) -> PrecheckReport {
        self.report
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn ledger(&self) -> &Arc<ProblemLedger> {
        &self.ledger
    }

    /// A run task that panicked never reached a terminal state on its own
    async fn settle_panicked(&self, run_id: &str, err: &JoinError) {
        error!(run_id = %run_id, "Run task panicked: {}", err);
        {
            let mut fsm = self.fsm.write().await;
            if fsm.state() != &RunState::Running {
                return;
            }
            if let Err(e) = fsm.process(RunEvent::Fail(err.to_string())) {
                warn!(run_id = %run_id, "{}", e);
            }
        }
        publish(
            &self.report,
            &self.events,
            ReportEvent::RunFinished {
                run_id: run_id.to_string(),
                outcome: RunOutcome::Failed,
            },
        );
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Everything one run needs on its task
struct RunTask {
    run_id: String,
    service: Arc<dyn PoolService>,
    ledger: Arc<ProblemLedger>,
    events: mpsc::UnboundedSender<ReportEvent>,
    fsm: Arc<RwLock<RunFsm>>,
    report: Arc<std::sync::RwLock<PrecheckReport>>,
    cancel: CancelFlag,
}

impl RunTask {
    async fn execute(self, plan: CheckPlan) -> Result<RunOutcome, PrecheckError> {
        self.emit(ReportEvent::RunStarted {
            run_id: self.run_id.clone(),
        });

        // livepatch codes and liveness start empty on every run
        let ctx = CheckContext::new(self.service.clone());
        let hosts = plan.groups.iter().map(|g| g.len()).max().unwrap_or(0);
        let mut progress = ProgressTracker::new(plan.groups.len(), hosts);

        for (index, group) in plan.groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return self.finish(RunOutcome::Cancelled).await;
            }

            let mut header = GroupHeader::new(index, group.name.clone());
            self.emit(ReportEvent::GroupStarted {
                header: header.clone(),
                progress: progress.start_group(index),
            });

            let mut group_result = PrecheckResult::Ok;
            for (check_index, check) in group.checks.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return self.finish(RunOutcome::Cancelled).await;
                }

                let problems = match check.run_all_checks(&ctx).await {
                    Ok(problems) => problems,
                    Err(e) => {
                        error!(
                            run_id = %self.run_id,
                            host = %check.host().name,
                            check = %check.description(),
                            "Check failed: {}",
                            e
                        );
                        self.fail(&e).await;
                        return Err(e);
                    }
                };

                let rows = if problems.is_empty() {
                    vec![HostRow::ok(&**check)]
                } else {
                    problems
                        .into_iter()
                        .map(|problem| HostRow::from_problem(self.ledger.record(problem)))
                        .collect()
                };

                for row in rows {
                    group_result = group_result.max(row.result());
                    self.emit(ReportEvent::Row {
                        group: index,
                        row,
                        progress: progress.check_done(check_index),
                    });
                }
            }

            header.result = Some(group_result);
            debug!(run_id = %self.run_id, group = %header.title, result = ?group_result, "Group finished");
            self.emit(ReportEvent::GroupFinished { header });
        }

        self.finish(RunOutcome::Completed).await
    }

    async fn finish(&self, outcome: RunOutcome) -> Result<RunOutcome, PrecheckError> {
        let event = match outcome {
            RunOutcome::Completed => RunEvent::Complete,
            RunOutcome::Cancelled => RunEvent::Cancel,
            RunOutcome::Failed => RunEvent::Fail("run failed".to_string()),
        };
        {
            let mut fsm = self.fsm.write().await;
            fsm.process(event).map_err(PrecheckError::RunStateError)?;
        }

        info!(run_id = %self.run_id, ?outcome, "Precheck run finished");
        self.emit(ReportEvent::RunFinished {
            run_id: self.run_id.clone(),
            outcome,
        });
        Ok(outcome)
    }

    async fn fail(&self, err: &PrecheckError) {
        {
            let mut fsm = self.fsm.write().await;
            if let Err(e) = fsm.process(RunEvent::Fail(err.to_string())) {
                warn!(run_id = %self.run_id, "{}", e);
            }
        }
        self.emit(ReportEvent::RunFinished {
            run_id: self.run_id.clone(),
            outcome: RunOutcome::Failed,
        });
    }

    /// Update the live report, then forward to the consumer. A consumer that
    /// went away does not stop the run.
    fn emit(&self, event: ReportEvent) {
        publish(&self.report, &self.events, event);
    }
}

fn publish(
    report: &std::sync::RwLock<PrecheckReport>,
    events: &mpsc::UnboundedSender<ReportEvent>,
    event: ReportEvent,
) {
    report
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .apply(&event);
    if events.send(event).is_err() {
        debug!("Report consumer gone, event dropped");
    }
}
