//! Status - state counts for operators.

use serde::{Deserialize, Serialize};

use crate::domain::{AccountRecord, TriggerState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub untriggered: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub failed_retryable: usize,
    pub failed_permanent: usize,
}

impl StateCounts {
    pub fn add(&mut self, record: &AccountRecord, retry_ceiling: u32) {
        match record.trigger_state {
            TriggerState::Untriggered => self.untriggered += 1,
            TriggerState::Claimed => self.claimed += 1,
            TriggerState::Delivered => self.delivered += 1,
            TriggerState::Failed if record.has_attempts_left(retry_ceiling) => {
                self.failed_retryable += 1
            }
            TriggerState::Failed => self.failed_permanent += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.untriggered
            + self.claimed
            + self.delivered
            + self.failed_retryable
            + self.failed_permanent
    }
}
