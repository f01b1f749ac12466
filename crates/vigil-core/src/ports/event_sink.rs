//! EventSink port - ドメインイベントの記録
//!
//! # 実装
//! - **TracingEventSink**: `tracing` に出力（デフォルト）
//! - **RecordingEventSink**: メモリに保持（テスト・埋め込み用）

use std::sync::Mutex;

use crate::domain::DomainEvent;

/// Alert target for the permanent-failure operational signal.
pub const ALERT_TARGET: &str = "vigil::alert";

/// EventSink はドメインイベントを受け取る
///
/// 同期 API: emit は軽量であること（ネットワーク送信は sink 側でバッファする）
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}

/// Logs every event; permanent failures at error level on [`ALERT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        let account = event.account().redacted();
        match event {
            DomainEvent::PermanentFailure {
                attempts,
                last_error,
                ..
            } => {
                tracing::error!(
                    target: ALERT_TARGET,
                    account = %account,
                    attempts,
                    last_error = last_error.as_deref().unwrap_or(""),
                    "retry ceiling exhausted; operator action required"
                );
            }
            DomainEvent::Superseded { epoch, delivered, .. } => {
                tracing::warn!(account = %account, epoch, delivered, "finalize superseded by newer claim");
            }
            other => {
                tracing::debug!(account = %account, event = other.name(), "trigger event");
            }
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn permanent_failures(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DomainEvent::PermanentFailure { .. }))
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &DomainEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(&DomainEvent::Delivered {
            account: AccountId::new("a"),
            epoch: 1,
            attempts: 1,
        });
        sink.emit(&DomainEvent::PermanentFailure {
            account: AccountId::new("b"),
            attempts: 3,
            last_error: None,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "delivered");
        assert_eq!(sink.permanent_failures(), 1);
    }
}
