//! Notifier port - 受益者への通知（email / SMS / webhook）
//!
//! 同じアカウントに対して複数回呼ばれても安全であること（at-least-once）。
//! payload reference は読むだけで、変更しません。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountId, AccountRecord, NotifyError, TriggerPolicy};

/// What the beneficiary receives when a switch fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerNotice {
    pub account: AccountId,
    pub contact: String,
    pub payload_reference: String,
    pub subject: String,
    pub body: String,

    /// Stable across retries and reclaims of one account; receivers dedup on it.
    pub idempotency_key: String,
}

/// Outbound delivery contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &TriggerNotice) -> Result<(), NotifyError>;
}

/// Composes the beneficiary-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeTemplate {
    pub sender: String,

    /// Where the beneficiary redeems the payload.
    pub redeem_url: String,
}

impl Default for NoticeTemplate {
    fn default() -> Self {
        Self {
            sender: "Vigil".to_string(),
            redeem_url: "https://localhost/redeem".to_string(),
        }
    }
}

impl NoticeTemplate {
    pub fn compose(&self, record: &AccountRecord, policy: &TriggerPolicy) -> TriggerNotice {
        let days = policy.threshold_days();
        let subject = format!("[{}] A dead man's switch has been triggered", self.sender);
        let body = format!(
            "Hello,\n\n\
             You are receiving this message because the owner of a protected vault has \
             not been active for more than {days} days. Control of the sealed material \
             has now passed to you.\n\n\
             Open the link below and unlock it with your own credentials:\n\
             {url}\n\n\
             Reference: {reference}\n\n\
             (This message was sent automatically; please do not reply.)\n",
            url = self.redeem_url,
            reference = record.payload_reference,
        );

        TriggerNotice {
            account: record.identity.clone(),
            contact: record.beneficiary_contact.clone(),
            payload_reference: record.payload_reference.clone(),
            subject,
            body,
            idempotency_key: format!(
                "{}:{}",
                record.identity,
                record.triggered_at.map_or(0, |t| t.timestamp_millis())
            ),
        }
    }
}
