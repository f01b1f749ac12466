//! EngineBuilder - engine の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - store / notifier が未設定なら build() で BuildError
//! - policy と runner 設定のゼロ値も build() で弾く（ループ開始後に気づかない）
//! - clock / event sink / runner id は省略可能（SystemClock, TracingEventSink, ULID）

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    AccountId, AccountRecord, CycleReport, NewAccount, RunnerId, StoreError, TriggerPolicy,
};
use crate::ports::{
    AccountStore, Clock, EventSink, IdGenerator, NoticeTemplate, Notifier, SystemClock,
    TracingEventSink, UlidGenerator,
};

use super::planner::{Candidate, ScanPlanner};
use super::runner::Runner;
use super::scheduler::{Scheduler, SchedulerHandle};
use super::status::StateCounts;
use super::trigger::TriggerMachine;

/// BuildError は engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no account store configured")]
    MissingStore,

    #[error("no notifier configured")]
    MissingNotifier,

    #[error("invalid trigger policy: {0}")]
    InvalidPolicy(&'static str),

    #[error("invalid runner settings: {0}")]
    InvalidSettings(&'static str),
}

/// EngineBuilder は Engine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .store(Arc::new(SqliteAccountStore::open("vigil.db")?))
///     .notifier(Arc::new(LogNotifier))
///     .workers(8)
///     .build()?;
/// let report = engine.run_once().await?;
/// ```
pub struct EngineBuilder {
    store: Option<Arc<dyn AccountStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    policy: TriggerPolicy,
    template: NoticeTemplate,
    runner_id: Option<RunnerId>,
    workers: usize,
    page_size: usize,
    cycle_interval: Duration,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            notifier: None,
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
            policy: TriggerPolicy::default_v1(),
            template: NoticeTemplate::default(),
            runner_id: None,
            workers: 4,
            page_size: 100,
            cycle_interval: Duration::from_secs(300),
        }
    }

    pub fn store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: TriggerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn template(mut self, template: NoticeTemplate) -> Self {
        self.template = template;
        self
    }

    /// Fix the runner identity (otherwise a fresh ULID per build).
    pub fn runner_id(mut self, runner_id: RunnerId) -> Self {
        self.runner_id = Some(runner_id);
        self
    }

    /// Maximum candidates processed concurrently within one cycle.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let notifier = self.notifier.ok_or(BuildError::MissingNotifier)?;
        validate_policy(&self.policy)?;
        if self.workers == 0 {
            return Err(BuildError::InvalidSettings("workers must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(BuildError::InvalidSettings("page_size must be at least 1"));
        }
        if self.cycle_interval.is_zero() {
            return Err(BuildError::InvalidSettings("cycle_interval must be positive"));
        }

        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let runner_id = self
            .runner_id
            .unwrap_or_else(|| ids.generate_runner_id());

        let machine = TriggerMachine::new(
            Arc::clone(&store),
            notifier,
            self.events,
            Arc::clone(&self.clock),
            self.policy.clone(),
            self.template,
            runner_id,
        );
        let runner = Runner::new(
            ScanPlanner::new(Arc::clone(&store), self.page_size),
            Arc::new(machine),
            Arc::clone(&self.clock),
            ids,
            self.workers,
        );

        Ok(Engine {
            store,
            runner: Arc::new(runner),
            clock: self.clock,
            policy: self.policy,
            cycle_interval: self.cycle_interval,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_policy(policy: &TriggerPolicy) -> Result<(), BuildError> {
    if policy.retry_ceiling == 0 {
        return Err(BuildError::InvalidPolicy("retry_ceiling must be at least 1"));
    }
    if policy.inactivity_threshold <= chrono::Duration::zero() {
        return Err(BuildError::InvalidPolicy("inactivity_threshold must be positive"));
    }
    if policy.claim_timeout <= chrono::Duration::zero() {
        return Err(BuildError::InvalidPolicy("claim_timeout must be positive"));
    }
    let max = chrono::Duration::seconds(TriggerPolicy::MAX_DURATION_SECS);
    if policy.inactivity_threshold > max || policy.claim_timeout > max {
        return Err(BuildError::InvalidPolicy("durations must not exceed 100 years"));
    }
    Ok(())
}

/// Wired trigger engine: one runner identity over one record store.
pub struct Engine {
    store: Arc<dyn AccountStore>,
    runner: Arc<Runner>,
    clock: Arc<dyn Clock>,
    policy: TriggerPolicy,
    cycle_interval: Duration,
}

impl Engine {
    pub fn runner_id(&self) -> RunnerId {
        self.runner.machine().runner_id()
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// One scan/trigger cycle.
    pub async fn run_once(&self) -> Result<CycleReport, StoreError> {
        self.runner.run_cycle().await
    }

    /// Start periodic cycles at the configured interval.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        Scheduler::new(Arc::clone(&self.runner), self.cycle_interval).spawn()
    }

    /// Candidates as of now, without claiming anything.
    pub async fn plan(&self) -> Result<Vec<Candidate>, StoreError> {
        self.runner
            .planner()
            .find_candidates(&self.policy, self.clock.now())
            .await
    }

    pub async fn status(&self) -> Result<StateCounts, StoreError> {
        self.store.counts(self.policy.retry_ceiling).await
    }

    pub async fn enroll(&self, account: NewAccount) -> Result<AccountRecord, StoreError> {
        self.store.insert(account, self.clock.now()).await
    }

    /// Record owner activity. `false` when the identity is unknown.
    pub async fn check_in(&self, identity: &AccountId) -> Result<bool, StoreError> {
        self.store.touch(identity, self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TriggerState;
    use crate::impls::InMemoryAccountStore;
    use crate::ports::{FixedClock, RecordingEventSink};
    use crate::testing::{new_account, t0, ScriptedNotifier};
    use rstest::rstest;

    fn builder() -> EngineBuilder {
        EngineBuilder::new()
            .store(Arc::new(InMemoryAccountStore::new()))
            .notifier(Arc::new(ScriptedNotifier::succeeding()))
            .events(Arc::new(RecordingEventSink::new()))
            .clock(Arc::new(FixedClock::new(t0())))
    }

    #[test]
    fn build_without_store_fails() {
        let result = EngineBuilder::new()
            .notifier(Arc::new(ScriptedNotifier::succeeding()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingStore)));
    }

    #[test]
    fn build_without_notifier_fails() {
        let result = EngineBuilder::new()
            .store(Arc::new(InMemoryAccountStore::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingNotifier)));
    }

    #[rstest]
    #[case::zero_ceiling(TriggerPolicy { retry_ceiling: 0, ..TriggerPolicy::default_v1() })]
    #[case::zero_threshold(TriggerPolicy { inactivity_threshold: chrono::Duration::zero(), ..TriggerPolicy::default_v1() })]
    #[case::negative_timeout(TriggerPolicy { claim_timeout: chrono::Duration::minutes(-1), ..TriggerPolicy::default_v1() })]
    #[case::threshold_beyond_clock_range(TriggerPolicy { inactivity_threshold: chrono::Duration::days(365 * 200_000), ..TriggerPolicy::default_v1() })]
    #[case::timeout_over_a_century(TriggerPolicy { claim_timeout: chrono::Duration::days(36_600), ..TriggerPolicy::default_v1() })]
    fn invalid_policy_is_rejected(#[case] policy: TriggerPolicy) {
        let result = builder().policy(policy).build();
        assert!(matches!(result, Err(BuildError::InvalidPolicy(_))));
    }

    #[rstest]
    #[case::no_workers(builder().workers(0))]
    #[case::empty_pages(builder().page_size(0))]
    #[case::zero_interval(builder().cycle_interval(Duration::ZERO))]
    fn invalid_settings_are_rejected(#[case] builder: EngineBuilder) {
        assert!(matches!(builder.build(), Err(BuildError::InvalidSettings(_))));
    }

    #[test]
    fn fixed_runner_id_is_kept() {
        let id = RunnerId::from_ulid(ulid::Ulid::new());
        let engine = builder().runner_id(id).build().unwrap();
        assert_eq!(engine.runner_id(), id);
    }

    #[tokio::test]
    async fn enroll_plan_run_and_report_status() {
        let engine = builder().build().unwrap();
        engine
            .enroll(new_account("silent", t0() - chrono::Duration::days(45)))
            .await
            .unwrap();
        engine
            .enroll(new_account("active", t0() - chrono::Duration::days(45)))
            .await
            .unwrap();
        assert!(engine.check_in(&AccountId::new("active")).await.unwrap());
        assert!(!engine.check_in(&AccountId::new("ghost")).await.unwrap());

        let plan = engine.plan().await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].record.identity.as_str(), "silent");

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.delivered, 1);

        let counts = engine.status().await.unwrap();
        assert_eq!(counts.delivered, 1);
        assert_eq!(counts.untriggered, 1);
        assert_eq!(counts.total(), 2);

        let record = engine
            .store()
            .get(&AccountId::new("silent"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.trigger_state, TriggerState::Delivered);
    }
}
