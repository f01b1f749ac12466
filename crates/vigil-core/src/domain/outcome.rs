//! Outcome model: what happened to one candidate, and to one cycle.

use serde::{Deserialize, Serialize};

/// Result of running the trigger state machine on one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Claim lost to another runner (or the owner checked in). Not an error.
    Skipped,

    Delivered { attempts: u32 },

    /// `permanent` when the retry ceiling is reached.
    Failed { attempts: u32, permanent: bool },

    /// Our finalize lost to a newer claim epoch.
    Superseded { delivered: bool },
}

/// Tally of one scan/trigger cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
    pub permanent_failures: usize,
    pub conflicts: usize,
    pub superseded: usize,

    /// Candidates abandoned because of a store error mid-protocol.
    pub errors: usize,
}

impl CycleReport {
    pub fn record(&mut self, outcome: TriggerOutcome) {
        match outcome {
            TriggerOutcome::Skipped => self.conflicts += 1,
            TriggerOutcome::Delivered { .. } => self.delivered += 1,
            TriggerOutcome::Failed { permanent, .. } => {
                self.failed += 1;
                if permanent {
                    self.permanent_failures += 1;
                }
            }
            TriggerOutcome::Superseded { .. } => self.superseded += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }
}
