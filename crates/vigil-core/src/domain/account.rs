//! Account record: the single durable source of truth for one switch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, RunnerId};
use super::policy::{Eligibility, EligibilityQuery};
use super::state::TriggerState;

/// One protected identity as stored by the record store.
///
/// Design:
/// - `last_activity`, `beneficiary_contact` and `payload_reference` belong to
///   the enrollment side; the engine only reads them.
/// - Everything else is written exclusively through [`ConditionalUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub identity: AccountId,
    pub last_activity: DateTime<Utc>,
    pub beneficiary_contact: String,
    pub payload_reference: String,

    pub trigger_state: TriggerState,

    /// Bumped by every successful claim; the compare-and-swap token.
    pub claim_epoch: u64,

    /// Notifier invocations so far (counted when the claim is written).
    pub delivery_attempts: u32,

    /// Set by the first successful claim and never cleared.
    pub triggered_at: Option<DateTime<Utc>>,

    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<RunnerId>,

    /// Reason reported by the notifier for the most recent failure.
    pub last_error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// Enrollment input. Records always start `Untriggered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub identity: AccountId,
    pub last_activity: DateTime<Utc>,
    pub beneficiary_contact: String,
    pub payload_reference: String,
}

impl AccountRecord {
    pub fn new(account: NewAccount, now: DateTime<Utc>) -> Self {
        Self {
            identity: account.identity,
            last_activity: account.last_activity,
            beneficiary_contact: account.beneficiary_contact,
            payload_reference: account.payload_reference,
            trigger_state: TriggerState::Untriggered,
            claim_epoch: 0,
            delivery_attempts: 0,
            triggered_at: None,
            claimed_at: None,
            claimed_by: None,
            last_error: None,
            updated_at: now,
        }
    }

    /// Evaluate the scan predicate against this record.
    ///
    /// Stores that cannot push the predicate down use this directly; SQL
    /// stores express the same predicate in their WHERE clause.
    ///
    /// Every arm requires the owner to still be silent: a check-in after a
    /// failed delivery or during an abandoned claim disarms the retry.
    pub fn eligibility(&self, query: &EligibilityQuery) -> Option<Eligibility> {
        if self.last_activity > query.inactive_since {
            return None;
        }
        match self.trigger_state {
            TriggerState::Untriggered => Some(Eligibility::Inactive),
            TriggerState::Failed if self.delivery_attempts < query.retry_ceiling => {
                Some(Eligibility::RetryFailed)
            }
            TriggerState::Claimed
                if self
                    .claimed_at
                    .is_some_and(|at| at < query.stale_claim_before) =>
            {
                Some(Eligibility::StaleClaim)
            }
            _ => None,
        }
    }

    pub fn has_attempts_left(&self, retry_ceiling: u32) -> bool {
        self.delivery_attempts < retry_ceiling
    }

    /// Build the claim write for this snapshot.
    ///
    /// `count_attempt` is false when the claim only exists to finalize an
    /// exhausted record without calling the notifier again. Every claim is
    /// additionally guarded on the owner still being silent, so a check-in
    /// that lands between scan and claim wins.
    pub fn claim(
        &self,
        runner: RunnerId,
        now: DateTime<Utc>,
        query: &EligibilityQuery,
        count_attempt: bool,
    ) -> ConditionalUpdate {
        let delivery_attempts = if count_attempt {
            self.delivery_attempts.saturating_add(1)
        } else {
            self.delivery_attempts
        };

        ConditionalUpdate {
            identity: self.identity.clone(),
            expected_state: self.trigger_state,
            expected_epoch: self.claim_epoch,
            inactive_since: Some(query.inactive_since),
            new_state: TriggerState::Claimed,
            fields: UpdateFields {
                claim_epoch: self.claim_epoch + 1,
                delivery_attempts,
                triggered_at: self.triggered_at.or(Some(now)),
                claimed_at: Some(now),
                claimed_by: Some(runner),
                last_error: self.last_error.clone(),
                updated_at: now,
            },
        }
    }

    /// Finalize a claimed snapshot as delivered.
    pub fn deliver(&self, now: DateTime<Utc>) -> ConditionalUpdate {
        self.finalize(TriggerState::Delivered, self.last_error.clone(), now)
    }

    /// Finalize a claimed snapshot as failed, keeping the attempt count.
    pub fn fail(&self, reason: impl Into<String>, now: DateTime<Utc>) -> ConditionalUpdate {
        self.finalize(TriggerState::Failed, Some(reason.into()), now)
    }

    fn finalize(
        &self,
        new_state: TriggerState,
        last_error: Option<String>,
        now: DateTime<Utc>,
    ) -> ConditionalUpdate {
        ConditionalUpdate {
            identity: self.identity.clone(),
            expected_state: self.trigger_state,
            expected_epoch: self.claim_epoch,
            inactive_since: None,
            new_state,
            fields: UpdateFields {
                claim_epoch: self.claim_epoch,
                delivery_attempts: self.delivery_attempts,
                triggered_at: self.triggered_at.or(Some(now)),
                claimed_at: self.claimed_at,
                claimed_by: self.claimed_by,
                last_error,
                updated_at: now,
            },
        }
    }

    /// Does the current record satisfy the update's guard?
    pub fn matches(&self, update: &ConditionalUpdate) -> bool {
        self.identity == update.identity
            && self.trigger_state == update.expected_state
            && self.claim_epoch == update.expected_epoch
            && update
                .inactive_since
                .is_none_or(|cutoff| self.last_activity <= cutoff)
    }

    /// Apply an update's new state and fields (guard already checked).
    pub fn apply(&mut self, update: &ConditionalUpdate) {
        let fields = &update.fields;
        self.trigger_state = update.new_state;
        self.claim_epoch = fields.claim_epoch;
        self.delivery_attempts = fields.delivery_attempts;
        self.triggered_at = fields.triggered_at;
        self.claimed_at = fields.claimed_at;
        self.claimed_by = fields.claimed_by;
        self.last_error = fields.last_error.clone();
        self.updated_at = fields.updated_at;
    }
}

/// A single compare-and-swap write against one account.
///
/// The store applies `new_state` + `fields` iff the stored record still has
/// `(expected_state, expected_epoch)` (and, when set, `last_activity <=
/// inactive_since`). Nothing is read back first; the guard and the write are
/// one atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpdate {
    pub identity: AccountId,
    pub expected_state: TriggerState,
    pub expected_epoch: u64,
    pub inactive_since: Option<DateTime<Utc>>,
    pub new_state: TriggerState,
    pub fields: UpdateFields,
}

impl ConditionalUpdate {
    /// Is this a legal state machine edge?
    pub fn is_valid_transition(&self) -> bool {
        self.expected_state.can_transition_to(self.new_state)
    }
}

/// Engine-owned columns written by a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFields {
    pub claim_epoch: u64,
    pub delivery_attempts: u32,
    pub triggered_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<RunnerId>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a conditional update. A conflict is an expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Conflict,
}

impl CasOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}
