//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ulid::Ulid;

use crate::app::{Runner, ScanPlanner, TriggerMachine};
use crate::domain::{AccountId, NewAccount, NotifyError, RunnerId, TriggerPolicy};
use crate::ports::{
    AccountStore, EventSink, FixedClock, NoticeTemplate, Notifier, TriggerNotice, UlidGenerator,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn new_account(id: &str, last_activity: DateTime<Utc>) -> NewAccount {
    NewAccount {
        identity: AccountId::new(id),
        last_activity,
        beneficiary_contact: format!("{id}@heir.example"),
        payload_reference: format!("vault/{id}"),
    }
}

/// Runner pinned at [`t0`] with the default policy and a page size of 3.
pub(crate) fn runner(
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    workers: usize,
) -> Runner {
    let clock = FixedClock::new(t0());
    let machine = TriggerMachine::new(
        Arc::clone(&store),
        notifier,
        events,
        Arc::new(clock.clone()),
        TriggerPolicy::default_v1(),
        NoticeTemplate::default(),
        RunnerId::from_ulid(Ulid::new()),
    );
    Runner::new(
        ScanPlanner::new(store, 3),
        Arc::new(machine),
        Arc::new(clock.clone()),
        Arc::new(UlidGenerator::new(clock)),
        workers,
    )
}

/// Notifier that fails a scripted number of times, then succeeds.
pub(crate) struct ScriptedNotifier {
    failures_left: AtomicU32,
    calls: AtomicU32,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedNotifier {
    pub(crate) fn succeeding() -> Self {
        Self::failing(0)
    }

    pub(crate) fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            calls: AtomicU32::new(0),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn deliver(&self, _notice: &TriggerNotice) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            Err(NotifyError::Transport("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}
