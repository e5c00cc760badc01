//! Problem ledger

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::problems::Problem;

/// Deduplicating record of every problem seen by the session, in discovery
/// order.
///
/// Holds at most one problem per (host, condition). The orchestration run is
/// the only writer; report consumers read snapshots.
#[derive(Debug, Default)]
pub struct ProblemLedger {
    entries: RwLock<Vec<Arc<Problem>>>,
}

impl ProblemLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly raised problem and return the canonical instance to
    /// report.
    ///
    /// An equivalent problem already in the ledger wins over the fresh one so
    /// its enabled state carries over. A host-not-live problem first evicts
    /// everything previously recorded for that host.
    pub fn record(&self, problem: Problem) -> Arc<Problem> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if problem.is_host_not_live() {
            let host_uuid = problem.host().uuid.clone();
            let before = entries.len();
            entries.retain(|p| p.host().uuid != host_uuid);
            debug!(
                host = %host_uuid,
                purged = before - entries.len(),
                "Host is not live, purged its recorded problems"
            );
        }

        if let Some(existing) = entries.iter().find(|p| ***p == problem) {
            return existing.clone();
        }

        let problem = Arc::new(problem);
        entries.push(problem.clone());
        problem
    }

    /// Remove every problem recorded for a host
    pub fn purge(&self, host_uuid: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|p| p.host().uuid != host_uuid);
        before - entries.len()
    }

    /// Whether an equivalent problem is recorded
    pub fn contains(&self, problem: &Problem) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().any(|p| **p == *problem)
    }

    /// Problems recorded for one host
    pub fn problems_for(&self, host_uuid: &str) -> Vec<Arc<Problem>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|p| p.host().uuid == host_uuid)
            .cloned()
            .collect()
    }

    /// Snapshot of all recorded problems
    pub fn snapshot(&self) -> Vec<Arc<Problem>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    /// Enable or disable every recorded problem
    pub fn set_all_enabled(&self, enabled: bool) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for problem in entries.iter() {
            problem.set_enabled(enabled);
        }
    }

    /// Forget everything
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
