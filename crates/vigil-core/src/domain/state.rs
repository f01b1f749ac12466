//! Trigger state machine states.

use serde::{Deserialize, Serialize};

/// Trigger state of an account record.
///
/// State transitions:
/// - Untriggered -> Claimed -> Delivered
/// - Untriggered -> Claimed -> Failed -> Claimed (loop until retry ceiling)
/// - Claimed -> Claimed (stale claim reclaimed after the claim timeout)
///
/// `Failed` with `delivery_attempts >= retry_ceiling` is the permanent
/// failure state; it is not a separate variant because the ceiling is an
/// operator setting, not a property of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Armed, waiting for the inactivity threshold.
    #[default]
    Untriggered,

    /// Exclusively owned by one runner for the current claim epoch.
    Claimed,

    /// Notification handed to the notifier successfully. Terminal.
    Delivered,

    /// Last delivery attempt failed.
    Failed,
}

impl TriggerState {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerState::Untriggered => "untriggered",
            TriggerState::Claimed => "claimed",
            TriggerState::Delivered => "delivered",
            TriggerState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "untriggered" => Some(TriggerState::Untriggered),
            "claimed" => Some(TriggerState::Claimed),
            "delivered" => Some(TriggerState::Delivered),
            "failed" => Some(TriggerState::Failed),
            _ => None,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TriggerState::Delivered)
    }

    /// Whether a conditional update may move a record from `self` to `next`.
    ///
    /// Never back to `Untriggered`, never out of `Delivered`.
    pub fn can_transition_to(self, next: TriggerState) -> bool {
        matches!(
            (self, next),
            (TriggerState::Untriggered, TriggerState::Claimed)
                | (TriggerState::Claimed, TriggerState::Claimed)
                | (TriggerState::Claimed, TriggerState::Delivered)
                | (TriggerState::Claimed, TriggerState::Failed)
                | (TriggerState::Failed, TriggerState::Claimed)
        )
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
