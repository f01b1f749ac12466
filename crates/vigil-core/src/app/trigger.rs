//! TriggerMachine - 1 候補ぶんの claim → deliver → finalize
//!
//! # フロー
//! 1. claim: `(state, epoch)` を guard にした conditional update。負けたら skip
//! 2. deliver: Notifier を呼ぶ（attempt は claim と同じ書き込みで加算済み）
//! 3. finalize: `(Claimed, 新 epoch)` を guard に Delivered / Failed へ
//!
//! Claim 後にクラッシュしても record は Claimed のまま残り、claim timeout
//! 経過後に別の runner が epoch を進めて回収します。古い epoch の finalize は
//! conflict になるので、遅れて届いた書き込みが新しい claim を壊すことはありません。

use std::sync::Arc;

use crate::domain::{
    AccountRecord, DomainEvent, Eligibility, EligibilityQuery, NotifyError, RunnerId, StoreError,
    TriggerOutcome, TriggerPolicy,
};
use crate::ports::{AccountStore, Clock, EventSink, NoticeTemplate, Notifier};

use super::planner::Candidate;

/// Reason recorded when a reclaimed record has no attempts left.
const EXHAUSTED_BEFORE_DELIVERY: &str = "retry ceiling reached before delivery";

pub struct TriggerMachine {
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    policy: TriggerPolicy,
    template: NoticeTemplate,
    runner: RunnerId,
}

impl TriggerMachine {
    pub fn new(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        policy: TriggerPolicy,
        template: NoticeTemplate,
        runner: RunnerId,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
            clock,
            policy,
            template,
            runner,
        }
    }

    pub fn runner_id(&self) -> RunnerId {
        self.runner
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Run the full protocol for one candidate.
    ///
    /// Notifier errors never surface here; they become `Failed`. A store
    /// error aborts this candidate only and leaves the record in a state the
    /// next cycle can pick up.
    pub async fn process(
        &self,
        candidate: Candidate,
        query: &EligibilityQuery,
    ) -> Result<TriggerOutcome, StoreError> {
        let Some(claimed) = self.claim(&candidate, query).await? else {
            return Ok(TriggerOutcome::Skipped);
        };

        if !self.policy.is_exhausted(candidate.record.delivery_attempts) {
            let notice = self.template.compose(&claimed, &self.policy);
            let delivery = self.notifier.deliver(&notice).await;
            return self.finalize(&claimed, delivery).await;
        }

        // abandoned claim that had already used its last attempt
        self.finalize_failed(&claimed, EXHAUSTED_BEFORE_DELIVERY.to_string(), false)
            .await
    }

    /// Claim step. Returns the post-claim snapshot, or `None` on conflict.
    pub async fn claim(
        &self,
        candidate: &Candidate,
        query: &EligibilityQuery,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let snapshot = &candidate.record;
        let account = snapshot.identity.redacted();
        let count_attempt = snapshot.has_attempts_left(self.policy.retry_ceiling);
        let update = snapshot.claim(self.runner, self.clock.now(), query, count_attempt);

        if !self.store.conditional_update(&update).await?.is_applied() {
            tracing::debug!(account = %account, epoch = snapshot.claim_epoch, "claim conflict; owned elsewhere");
            return Ok(None);
        }

        let mut claimed = snapshot.clone();
        claimed.apply(&update);

        let reclaimed = candidate.eligibility == Eligibility::StaleClaim;
        if reclaimed {
            tracing::warn!(
                account = %account,
                previous_owner = ?snapshot.claimed_by.map(|r| r.to_string()),
                epoch = claimed.claim_epoch,
                "reclaimed abandoned claim"
            );
        }
        self.events.emit(&DomainEvent::Claimed {
            account: claimed.identity.clone(),
            runner: self.runner,
            epoch: claimed.claim_epoch,
            reclaimed,
        });
        Ok(Some(claimed))
    }

    /// Finalize step for a claimed snapshot given the notifier's result.
    ///
    /// Guarded by the snapshot's epoch: once the epoch has moved on, this is
    /// a no-op that reports `Superseded`, however many times it is called.
    pub async fn finalize(
        &self,
        claimed: &AccountRecord,
        delivery: Result<(), NotifyError>,
    ) -> Result<TriggerOutcome, StoreError> {
        match delivery {
            Ok(()) => self.finalize_delivered(claimed).await,
            Err(err) => {
                tracing::warn!(
                    account = %claimed.identity.redacted(),
                    attempts = claimed.delivery_attempts,
                    error = %err,
                    "delivery failed"
                );
                self.finalize_failed(claimed, err.to_string(), true).await
            }
        }
    }

    async fn finalize_delivered(
        &self,
        claimed: &AccountRecord,
    ) -> Result<TriggerOutcome, StoreError> {
        let update = claimed.deliver(self.clock.now());
        if !self.store.conditional_update(&update).await?.is_applied() {
            return Ok(self.superseded(claimed, true));
        }

        tracing::info!(
            account = %claimed.identity.redacted(),
            attempts = claimed.delivery_attempts,
            "switch delivered"
        );
        self.events.emit(&DomainEvent::Delivered {
            account: claimed.identity.clone(),
            epoch: claimed.claim_epoch,
            attempts: claimed.delivery_attempts,
        });
        Ok(TriggerOutcome::Delivered {
            attempts: claimed.delivery_attempts,
        })
    }

    async fn finalize_failed(
        &self,
        claimed: &AccountRecord,
        reason: String,
        attempted: bool,
    ) -> Result<TriggerOutcome, StoreError> {
        let update = claimed.fail(reason.clone(), self.clock.now());
        if !self.store.conditional_update(&update).await?.is_applied() {
            return Ok(self.superseded(claimed, false));
        }

        let attempts = claimed.delivery_attempts;
        if attempted {
            self.events.emit(&DomainEvent::DeliveryFailed {
                account: claimed.identity.clone(),
                epoch: claimed.claim_epoch,
                attempts,
                reason: reason.clone(),
            });
        }

        let permanent = self.policy.is_exhausted(attempts);
        if permanent {
            // the CAS above has exactly one winner per epoch, so this fires once
            self.events.emit(&DomainEvent::PermanentFailure {
                account: claimed.identity.clone(),
                attempts,
                last_error: Some(reason),
            });
        }
        Ok(TriggerOutcome::Failed {
            attempts,
            permanent,
        })
    }

    fn superseded(&self, claimed: &AccountRecord, delivered: bool) -> TriggerOutcome {
        // delivered under a lost claim: the new owner may deliver again
        self.events.emit(&DomainEvent::Superseded {
            account: claimed.identity.clone(),
            epoch: claimed.claim_epoch,
            delivered,
        });
        TriggerOutcome::Superseded { delivered }
    }
}
