//! Asynchronous actions
//!
//! Remediations and update applies are [`AsyncAction`]s. [`ActionHandle::start`]
//! spawns one and tracks its progress and terminal state.

pub mod apply;
pub mod parallel;
pub mod plan;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::errors::PrecheckError;
use crate::utils::CancelFlag;

pub use apply::ApplyUpdateAction;
pub use parallel::ParallelAction;
pub use plan::ApplyPoolUpdatePlanAction;

/// Unit of asynchronous work
#[async_trait]
pub trait AsyncAction: Send + Sync {
    fn description(&self) -> String;

    fn can_cancel(&self) -> bool {
        true
    }

    /// Extra cancellation work besides raising the progress cancel flag
    fn cancel(&self) {}

    /// Progress computed by the action itself, overriding what it reported
    fn progress(&self) -> Option<u8> {
        None
    }

    /// Run to completion. Return [`PrecheckError::Cancelled`] when stopped
    /// on request.
    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError>;
}

/// Progress and cancellation shared between an action and its handle
#[derive(Debug, Clone, Default)]
pub struct ActionProgress {
    percent: Arc<AtomicU8>,
    cancel: CancelFlag,
}

impl ActionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, percent: u8) {
        self.percent.store(percent.min(100), Ordering::SeqCst);
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Action state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    NotStarted,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Succeeded | ActionState::Failed(_) | ActionState::Cancelled
        )
    }
}

struct HandleInner {
    action: Arc<dyn AsyncAction>,
    progress: ActionProgress,
    state: std::sync::RwLock<ActionState>,
    done: watch::Sender<bool>,
}

/// Handle of a spawned action
#[derive(Clone)]
pub struct ActionHandle {
    inner: Arc<HandleInner>,
}

impl ActionHandle {
    /// Create a handle without starting the action
    pub fn new(action: Arc<dyn AsyncAction>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                action,
                progress: ActionProgress::new(),
                state: std::sync::RwLock::new(ActionState::NotStarted),
                done,
            }),
        }
    }

    /// Spawn the action on the runtime
    pub fn start(action: Arc<dyn AsyncAction>) -> Self {
        let handle = Self::new(action);
        handle.set_state(ActionState::Running);
        let runner = handle.clone();
        tokio::spawn(async move { runner.run().await });
        handle
    }

    /// Run the action on the current task and record its terminal state.
    /// A panicking action ends up `Failed`.
    pub async fn run(&self) -> ActionState {
        let description = self.inner.action.description();
        self.set_state(ActionState::Running);
        debug!(action = %description, "Action started");

        let outcome = AssertUnwindSafe(self.inner.action.run(&self.inner.progress))
            .catch_unwind()
            .await;
        let state = match outcome {
            Err(panic) => {
                let reason = panic_reason(&*panic);
                error!(action = %description, "Action panicked: {}", reason);
                ActionState::Failed(format!("Action panicked: {}", reason))
            }
            Ok(Ok(())) => {
                self.inner.progress.set(100);
                info!(action = %self.inner.action.description(), "Action succeeded");
                ActionState::Succeeded
            }
            Ok(Err(PrecheckError::Cancelled)) => {
                info!(action = %description, "Action cancelled");
                ActionState::Cancelled
            }
            Ok(Err(e)) => {
                error!(action = %description, "Action failed: {}", e);
                ActionState::Failed(e.to_string())
            }
        };

        self.set_state(state.clone());
        self.inner.done.send_replace(true);
        state
    }

    pub fn description(&self) -> String {
        self.inner.action.description()
    }

    pub fn progress(&self) -> u8 {
        self.inner
            .action
            .progress()
            .unwrap_or_else(|| self.inner.progress.percent())
    }

    pub fn state(&self) -> ActionState {
        self.inner
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn can_cancel(&self) -> bool {
        self.inner.action.can_cancel()
    }

    pub fn cancel(&self) {
        if !self.can_cancel() {
            debug!(action = %self.description(), "Action cannot be cancelled");
            return;
        }
        self.inner.progress.cancel();
        self.inner.action.cancel();
    }

    /// Wait until the action reached a terminal state
    pub async fn wait_completed(&self) -> ActionState {
        let mut done = self.inner.done.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        self.state()
    }

    fn set_state(&self, state: ActionState) {
        let mut current = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        *current = state;
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("description", &self.description())
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}
