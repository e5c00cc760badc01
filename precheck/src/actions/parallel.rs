//! Composite action running its members concurrently

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::actions::{ActionHandle, ActionProgress, ActionState, AsyncAction};
use crate::errors::PrecheckError;

/// Runs every member on its own task and completes once all of them did.
///
/// A failing member does not stop the others.
pub struct ParallelAction {
    description: String,
    members: Vec<Arc<dyn AsyncAction>>,
    handles: Mutex<Vec<ActionHandle>>,
}

impl ParallelAction {
    pub fn new(description: impl Into<String>, members: Vec<Arc<dyn AsyncAction>>) -> Self {
        Self {
            description: description.into(),
            members,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Handles of the members, empty until the action started
    pub fn member_handles(&self) -> Vec<ActionHandle> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AsyncAction for ParallelAction {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn cancel(&self) {
        for handle in self.member_handles() {
            handle.cancel();
        }
    }

    fn progress(&self) -> Option<u8> {
        let handles = self.member_handles();
        if handles.is_empty() {
            return None;
        }
        let total: u32 = handles.iter().map(|h| h.progress() as u32).sum();
        Some((total / handles.len() as u32) as u8)
    }

    async fn run(&self, progress: &ActionProgress) -> Result<(), PrecheckError> {
        let handles: Vec<ActionHandle> = self
            .members
            .iter()
            .cloned()
            .map(ActionHandle::start)
            .collect();
        {
            let mut current = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            *current = handles.clone();
        }

        // cancelled while the members were being spawned
        if progress.is_cancelled() {
            self.cancel();
        }

        let states = join_all(handles.iter().map(|h| h.wait_completed())).await;

        if progress.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }

        let failures: Vec<String> = handles
            .iter()
            .zip(&states)
            .filter_map(|(handle, state)| match state {
                ActionState::Failed(reason) => Some(format!("{}: {}", handle.description(), reason)),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            info!(action = %self.description, members = handles.len(), "All members succeeded");
            Ok(())
        } else {
            warn!(
                action = %self.description,
                failed = failures.len(),
                members = handles.len(),
                "Some members failed"
            );
            Err(PrecheckError::RemediationError(failures.join("; ")))
        }
    }
}
