//! LogNotifier - 送信せずにログへ出すだけ（dry-run / ローカル用）

use async_trait::async_trait;

use crate::domain::NotifyError;
use crate::ports::{Notifier, TriggerNotice};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &TriggerNotice) -> Result<(), NotifyError> {
        tracing::info!(
            account = %notice.account.redacted(),
            subject = %notice.subject,
            idempotency_key = %notice.idempotency_key,
            "dry-run delivery"
        );
        Ok(())
    }
}
