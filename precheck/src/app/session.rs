//! Precheck session
//!
//! Ties the ledger, the orchestrator and the remediation runner of one
//! rollout together and derives the control state from the current rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::actions::ActionHandle;
use crate::engine::{
    HostRow, PrecheckOrchestrator, PrecheckReport, ReportEvent, ReportGroup, RunOutcome, RunState,
};
use crate::errors::PrecheckError;
use crate::plan::{PlanBuilder, PlanRequest};
use crate::problems::ProblemLedger;
use crate::remediation::{ConfirmFn, Recheck, RemediationRunner, ResolveOutcome};
use crate::service::PoolService;

/// Rebuilds the plan and starts a fresh run
pub struct Rechecker {
    orchestrator: Arc<PrecheckOrchestrator>,
    builder: Arc<dyn PlanBuilder>,
    request: PlanRequest,
}

#[async_trait]
impl Recheck for Rechecker {
    async fn recheck(&self) -> Result<(), PrecheckError> {
        let plan = self.builder.build_plan(&self.request);
        self.orchestrator.start(plan).await?;
        Ok(())
    }

    fn cancel(&self) {
        self.orchestrator.cancel();
    }
}

/// One rollout's precheck page, without the page
pub struct PrecheckSession {
    ledger: Arc<ProblemLedger>,
    orchestrator: Arc<PrecheckOrchestrator>,
    rechecker: Arc<Rechecker>,
    runner: RemediationRunner,
    failures_only: AtomicBool,
}

impl PrecheckSession {
    /// Create the session and the receiving end of its report channel
    pub fn new(
        service: Arc<dyn PoolService>,
        builder: Arc<dyn PlanBuilder>,
        request: PlanRequest,
    ) -> (Self, mpsc::UnboundedReceiver<ReportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(ProblemLedger::new());
        let orchestrator = Arc::new(PrecheckOrchestrator::new(
            service.clone(),
            ledger.clone(),
            tx,
        ));
        let rechecker = Arc::new(Rechecker {
            orchestrator: orchestrator.clone(),
            builder,
            request,
        });
        let runner = RemediationRunner::new(service, ledger.clone(), rechecker.clone());

        let session = Self {
            ledger,
            orchestrator,
            rechecker,
            runner,
            failures_only: AtomicBool::new(false),
        };
        (session, rx)
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.runner = self.runner.with_confirm(confirm);
        self
    }

    /// Start a run, cancelling the one in progress
    pub async fn recheck(&self) -> Result<(), PrecheckError> {
        self.rechecker.recheck().await
    }

    pub async fn wait_for_run(&self) -> Result<RunOutcome, PrecheckError> {
        self.orchestrator.wait().await
    }

    /// Wait for the remediation in progress and the recheck it triggers
    pub async fn wait_for_remediation(&self) {
        self.runner.wait().await;
    }

    pub async fn run_state(&self) -> RunState {
        self.orchestrator.state().await
    }

    pub fn report(&self) -> PrecheckReport {
        self.orchestrator.report_snapshot()
    }

    pub fn set_failures_only(&self, failures_only: bool) {
        self.failures_only.store(failures_only, Ordering::SeqCst);
    }

    /// Groups and rows as currently shown
    pub fn rows(&self) -> Vec<ReportGroup> {
        self.report()
            .visible(self.failures_only.load(Ordering::SeqCst))
    }

    pub fn resolve_all_enabled(&self) -> bool {
        !self.runner.is_in_progress() && self.report().resolve_all_enabled()
    }

    /// Whether the rollout can move on: nothing running and no problem rows
    pub async fn can_proceed(&self) -> bool {
        !self.orchestrator.is_running().await
            && !self.runner.is_in_progress()
            && !self.report().has_problems()
    }

    pub fn is_remediation_in_progress(&self) -> bool {
        self.runner.is_in_progress()
    }

    pub async fn resolve_one(&self, row: &HostRow) -> Result<ResolveOutcome, PrecheckError> {
        match &row.problem {
            Some(problem) => self.runner.resolve_one(problem).await,
            None => Ok(ResolveOutcome::Declined),
        }
    }

    pub async fn resolve_all(&self) -> Result<Option<ActionHandle>, PrecheckError> {
        let problems = self.report().fixable_problems();
        self.runner.resolve_all(&problems).await
    }

    /// Cancel the run and the remediation in progress. No recheck follows.
    pub fn cancel(&self) {
        info!("Cancelling precheck session");
        self.runner.stop();
        self.orchestrator.cancel();
    }

    /// Cancel everything and wait until neither a run nor a remediation is
    /// active
    pub async fn shutdown(&self) {
        self.cancel();
        self.runner.wait().await;
        // the remediation follow-up may have started a recheck
        self.orchestrator.cancel();
        if let Err(e) = self.orchestrator.wait().await {
            debug!("No run left to stop: {}", e);
        }
    }

    pub fn ledger(&self) -> &Arc<ProblemLedger> {
        &self.ledger
    }
}
