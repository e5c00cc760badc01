//! Remediation runner
//!
//! Runs the fix of one problem, or of every fixable problem at once, and
//! re-validates with a fresh run once the fixes are done. Remediation never
//! assumes its own success.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionHandle, AsyncAction, ParallelAction};
use crate::errors::PrecheckError;
use crate::problems::{Problem, ProblemLedger};
use crate::service::PoolService;
use crate::utils::CancelFlag;

/// Triggers a fresh precheck run
#[async_trait]
pub trait Recheck: Send + Sync {
    async fn recheck(&self) -> Result<(), PrecheckError>;

    /// Stop a run started by [`Recheck::recheck`]
    fn cancel(&self) {}
}

/// Asked before running a fix that needs confirmation
pub type ConfirmFn = Arc<dyn Fn(&Problem) -> bool + Send + Sync>;

/// What resolving a single problem led to
#[derive(Debug)]
pub enum ResolveOutcome {
    /// The fix is running
    Started(ActionHandle),
    /// No automatic fix; the problem points at a reference page
    OpenLink { url: String },
    /// No automatic fix; the operator has to solve it by hand
    ShowGuidance { text: String },
    /// The fix was declined or no longer applies
    Declined,
}

/// Runs problem fixes
pub struct RemediationRunner {
    service: Arc<dyn PoolService>,
    ledger: Arc<ProblemLedger>,
    recheck: Arc<dyn Recheck>,
    confirm: ConfirmFn,
    current: Mutex<Option<ActionHandle>>,
    /// Raised when the page goes away; the follow-up then skips the recheck
    stopped: Mutex<CancelFlag>,
    /// Held for the whole of a resolve call
    gate: tokio::sync::Mutex<()>,
    follow_up: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RemediationRunner {
    pub fn new(
        service: Arc<dyn PoolService>,
        ledger: Arc<ProblemLedger>,
        recheck: Arc<dyn Recheck>,
    ) -> Self {
        Self {
            service,
            ledger,
            recheck,
            confirm: Arc::new(|_: &Problem| true),
            current: Mutex::new(None),
            stopped: Mutex::new(CancelFlag::new()),
            gate: tokio::sync::Mutex::new(()),
            follow_up: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = confirm;
        self
    }

    /// Resolve one problem
    pub async fn resolve_one(&self, problem: &Arc<Problem>) -> Result<ResolveOutcome, PrecheckError> {
        let _gate = self.gate.lock().await;
        self.ensure_idle()?;

        if !problem.enabled() {
            debug!(problem = %problem.description(), "Problem disabled, not resolving");
            return Ok(ResolveOutcome::Declined);
        }

        if let Some(fix) = problem.fix() {
            if fix.needs_confirmation() && !(self.confirm)(&**problem) {
                info!(problem = %problem.description(), "Fix declined");
                return Ok(ResolveOutcome::Declined);
            }
            return match fix.create_action(&self.service).await? {
                Some(action) => Ok(ResolveOutcome::Started(self.launch(action).await)),
                None => Ok(ResolveOutcome::Declined),
            };
        }

        if let Some((url, _)) = problem.kind().link() {
            return Ok(ResolveOutcome::OpenLink {
                url: url.to_string(),
            });
        }

        let text = match problem.help_message() {
            Some(help) if !help.is_empty() => format!(
                "{}\n\nThis problem has to be solved manually: {}",
                problem.description(),
                help
            ),
            _ => format!(
                "{}\n\nThis problem has to be solved manually.",
                problem.description()
            ),
        };
        Ok(ResolveOutcome::ShowGuidance { text })
    }

    /// Resolve every fixable problem at once. `None` when there was nothing
    /// to run.
    pub async fn resolve_all(
        &self,
        problems: &[Arc<Problem>],
    ) -> Result<Option<ActionHandle>, PrecheckError> {
        let _gate = self.gate.lock().await;
        self.ensure_idle()?;

        let mut actions: Vec<Arc<dyn AsyncAction>> = Vec::new();
        for problem in problems.iter().filter(|p| p.is_fixable() && p.enabled()) {
            let Some(fix) = problem.fix() else { continue };
            if fix.needs_confirmation() && !(self.confirm)(&**problem) {
                info!(problem = %problem.description(), "Fix declined");
                continue;
            }
            if let Some(action) = fix.create_action(&self.service).await? {
                actions.push(action);
            }
        }

        if actions.is_empty() {
            debug!("Nothing to resolve");
            return Ok(None);
        }

        info!(actions = actions.len(), "Resolving all problems");
        let batch = Arc::new(ParallelAction::new("Resolving all problems", actions));
        Ok(Some(self.launch(batch).await))
    }

    /// Cancel the running remediation and drop the recheck it would trigger.
    /// For when the page itself goes away.
    pub fn stop(&self) {
        self.stopped.lock().unwrap_or_else(|e| e.into_inner()).cancel();
        self.cancel();
    }

    /// Cancel the running remediation, if any. The recheck still follows.
    pub fn cancel(&self) {
        if let Some(handle) = self.current_handle() {
            if !handle.is_completed() {
                info!(action = %handle.description(), "Cancelling remediation");
                handle.cancel();
            }
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.current_handle().is_some_and(|h| !h.is_completed())
    }

    pub fn current_handle(&self) -> Option<ActionHandle> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait for the running remediation and the recheck it triggers
    pub async fn wait(&self) {
        let follow_up = self.follow_up.lock().await.take();
        if let Some(join) = follow_up {
            if let Err(e) = join.await {
                error!("Remediation follow-up panicked: {}", e);
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), PrecheckError> {
        if self.is_in_progress() {
            return Err(PrecheckError::RemediationError(
                "A remediation is already in progress".to_string(),
            ));
        }
        Ok(())
    }

    async fn launch(&self, action: Arc<dyn AsyncAction>) -> ActionHandle {
        // the recheck of the previous remediation has to be started first
        self.wait().await;

        // rows stay disabled until the fixes are done
        self.ledger.set_all_enabled(false);

        let stopped = CancelFlag::new();
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = stopped.clone();

        let handle = ActionHandle::start(action);
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            *current = Some(handle.clone());
        }

        let ledger = self.ledger.clone();
        let recheck = self.recheck.clone();
        let watched = handle.clone();
        let join = tokio::spawn(async move {
            let state = watched.wait_completed().await;
            debug!(action = %watched.description(), ?state, "Remediation finished");
            ledger.set_all_enabled(true);
            if stopped.is_cancelled() {
                info!("Remediation stopped, skipping recheck");
                return;
            }
            if let Err(e) = recheck.recheck().await {
                warn!("Recheck after remediation failed: {}", e);
            }
            // stopped while the recheck was starting
            if stopped.is_cancelled() {
                recheck.cancel();
            }
        });

        *self.follow_up.lock().await = Some(join);
        handle
    }
}
