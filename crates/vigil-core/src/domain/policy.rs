//! Trigger policy: thresholds that decide eligibility and retries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Operator-tunable thresholds for the trigger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPolicy {
    /// How long an owner may stay silent before the switch fires.
    pub inactivity_threshold: Duration,

    /// Maximum number of notifier invocations per account.
    pub retry_ceiling: u32,

    /// A claim older than this is treated as abandoned by a crashed runner.
    pub claim_timeout: Duration,
}

impl TriggerPolicy {
    /// Longest accepted threshold or claim timeout (100 years); keeps cutoff
    /// arithmetic against the clock in range.
    pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

    /// 30 days of silence, 3 attempts, 15 minute claims.
    pub fn default_v1() -> Self {
        Self {
            inactivity_threshold: Duration::days(30),
            retry_ceiling: 3,
            claim_timeout: Duration::minutes(15),
        }
    }

    /// Point-in-time eligibility query for a cycle starting at `now`.
    pub fn query_at(&self, now: DateTime<Utc>) -> EligibilityQuery {
        EligibilityQuery {
            inactive_since: now - self.inactivity_threshold,
            stale_claim_before: now - self.claim_timeout,
            retry_ceiling: self.retry_ceiling,
        }
    }

    /// Has an account used up all its delivery attempts?
    pub fn is_exhausted(&self, delivery_attempts: u32) -> bool {
        delivery_attempts >= self.retry_ceiling
    }

    /// Threshold in whole days, as shown to beneficiaries.
    pub fn threshold_days(&self) -> i64 {
        self.inactivity_threshold.num_days()
    }
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::default_v1()
    }
}

/// Snapshot of the eligibility predicate, fixed for one cycle.
///
/// A record is a candidate iff `last_activity <= inactive_since` and one of:
/// - `Untriggered`
/// - `Failed` and `delivery_attempts < retry_ceiling`
/// - `Claimed` and `claimed_at < stale_claim_before`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityQuery {
    pub inactive_since: DateTime<Utc>,
    pub stale_claim_before: DateTime<Utc>,
    pub retry_ceiling: u32,
}

/// Why a record showed up in a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Armed and silent past the threshold.
    Inactive,

    /// Previous delivery failed, attempts left.
    RetryFailed,

    /// Claim outlived the claim timeout.
    StaleClaim,
}
