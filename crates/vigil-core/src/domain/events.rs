//! Events - ドメインイベント
//!
//! Trigger state machine が状態遷移に成功したときに発行されます。
//! `PermanentFailure` は運用者へのアラート（operational signal）です。

use serde::{Deserialize, Serialize};

use super::ids::{AccountId, RunnerId};

/// Something the trigger state machine did to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Claim written. `reclaimed` is true when a stale claim was taken over.
    Claimed {
        account: AccountId,
        runner: RunnerId,
        epoch: u64,
        reclaimed: bool,
    },

    Delivered {
        account: AccountId,
        epoch: u64,
        attempts: u32,
    },

    DeliveryFailed {
        account: AccountId,
        epoch: u64,
        attempts: u32,
        reason: String,
    },

    /// Retry ceiling reached without a delivery. Emitted once per account.
    PermanentFailure {
        account: AccountId,
        attempts: u32,
        last_error: Option<String>,
    },

    /// A finalize write lost to a newer claim epoch.
    Superseded {
        account: AccountId,
        epoch: u64,
        delivered: bool,
    },
}

impl DomainEvent {
    pub fn account(&self) -> &AccountId {
        match self {
            DomainEvent::Claimed { account, .. }
            | DomainEvent::Delivered { account, .. }
            | DomainEvent::DeliveryFailed { account, .. }
            | DomainEvent::PermanentFailure { account, .. }
            | DomainEvent::Superseded { account, .. } => account,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Claimed { .. } => "claimed",
            DomainEvent::Delivered { .. } => "delivered",
            DomainEvent::DeliveryFailed { .. } => "delivery_failed",
            DomainEvent::PermanentFailure { .. } => "permanent_failure",
            DomainEvent::Superseded { .. } => "superseded",
        }
    }
}
