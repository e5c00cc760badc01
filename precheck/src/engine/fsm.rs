//! Finite State Machine for precheck runs

use serde::{Deserialize, Serialize};

/// Run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run has been started yet
    Idle,

    /// Checks are executing
    Running,

    /// Every group ran to the end
    Completed,

    /// Stopped at a check boundary on request
    Cancelled,

    /// A check raised an error and the run was aborted
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Start a run
    Start,

    /// All groups finished
    Complete,

    /// Cancellation observed at a boundary
    Cancel,

    /// A check raised an error
    Fail(String),
}

/// Precheck run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
    error: Option<String>,
    run_count: u32,
}

impl RunFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            error: None,
            run_count: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Error of the last failed run
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of runs started so far
    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // Idle or any terminal state can start a new run
            (RunState::Idle, RunEvent::Start)
            | (RunState::Completed, RunEvent::Start)
            | (RunState::Cancelled, RunEvent::Start)
            | (RunState::Failed, RunEvent::Start) => {
                self.error = None;
                self.run_count += 1;
                RunState::Running
            }

            // From Running
            (RunState::Running, RunEvent::Complete) => RunState::Completed,
            (RunState::Running, RunEvent::Cancel) => RunState::Cancelled,
            (RunState::Running, RunEvent::Fail(err)) => {
                self.error = Some(err.clone());
                RunState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
