//! Webhook notifier: POSTs the trigger notice as JSON.
//!
//! Mail / SMS gateways sit behind the webhook; this crate does not speak
//! SMTP itself.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::NotifyError;
use crate::ports::{Notifier, TriggerNotice};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notice: &TriggerNotice) -> Result<(), NotifyError> {
        if notice.contact.trim().is_empty() {
            return Err(NotifyError::InvalidContact("empty contact".to_string()));
        }

        let resp = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, &notice.idempotency_key)
            .json(&serde_json::json!({
                "to": notice.contact,
                "subject": notice.subject,
                "text": notice.body,
                "payload_reference": notice.payload_reference,
                "idempotency_key": notice.idempotency_key,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("webhook send failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(account = %notice.account.redacted(), status = status.as_u16(), "webhook delivered");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
