//! Errors - エラー型と分類
//!
//! Claim / finalize の競合（conflict）はエラーではありません。
//! [`CasOutcome::Conflict`](super::CasOutcome) として値で返します。

use thiserror::Error;

use super::ids::AccountId;
use super::state::TriggerState;

/// Record store failures.
///
/// `Unavailable` during planning aborts the cycle; anywhere else it is
/// isolated to the candidate being processed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record {identity}: {reason}")]
    Corrupt { identity: AccountId, reason: String },

    #[error("account already enrolled: {0}")]
    AlreadyExists(AccountId),

    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: TriggerState, to: TriggerState },
}

/// Notifier failures. Every variant is recorded as a failed attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by endpoint (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid beneficiary contact: {0}")]
    InvalidContact(String),
}
