//! Runner - 1 サイクル分の scan + trigger
//!
//! # 設計原則
//! - 候補ごとの処理は独立。1 件の失敗（通知失敗・store エラー・panic）が
//!   他の候補を止めない
//! - 同時実行数は `workers` で上限（Semaphore）
//! - scan 自体が失敗したら新規投入を止め、実行中の候補を待ってから Err を返す

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::domain::{CycleReport, StoreError, TriggerOutcome};
use crate::ports::{Clock, IdGenerator};

use super::planner::ScanPlanner;
use super::trigger::TriggerMachine;

pub struct Runner {
    planner: ScanPlanner,
    machine: Arc<TriggerMachine>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    workers: usize,
}

impl Runner {
    pub fn new(
        planner: ScanPlanner,
        machine: Arc<TriggerMachine>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        workers: usize,
    ) -> Self {
        Self {
            planner,
            machine,
            clock,
            ids,
            workers: workers.max(1),
        }
    }

    pub fn machine(&self) -> &TriggerMachine {
        &self.machine
    }

    pub fn planner(&self) -> &ScanPlanner {
        &self.planner
    }

    /// Run one scan/trigger cycle to completion.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let cycle = self.ids.generate_cycle_id();
        let span = tracing::info_span!(
            "cycle",
            cycle = %cycle,
            runner = %self.machine.runner_id()
        );
        self.run_cycle_inner().instrument(span).await
    }

    async fn run_cycle_inner(&self) -> Result<CycleReport, StoreError> {
        let query = self.machine.policy().query_at(self.clock.now());
        let mut scan = self.planner.scan(query);
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<Result<TriggerOutcome, StoreError>> = JoinSet::new();
        let mut report = CycleReport::default();

        let scanned = loop {
            let page = match scan.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };

            for candidate in page {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                while let Some(done) = tasks.try_join_next() {
                    tally(&mut report, done);
                }

                report.candidates += 1;
                let machine = Arc::clone(&self.machine);
                let span = tracing::debug_span!(
                    "candidate",
                    account = %candidate.record.identity.redacted(),
                    reason = ?candidate.eligibility
                );
                tasks.spawn(
                    async move {
                        let _permit = permit;
                        machine.process(candidate, &query).await
                    }
                    .instrument(span),
                );
            }
        };

        while let Some(done) = tasks.join_next().await {
            tally(&mut report, done);
        }

        if let Err(err) = scanned {
            tracing::warn!(error = %err, started = report.candidates, "scan aborted; cycle incomplete");
            return Err(err);
        }

        tracing::info!(
            candidates = report.candidates,
            delivered = report.delivered,
            failed = report.failed,
            permanent = report.permanent_failures,
            conflicts = report.conflicts,
            superseded = report.superseded,
            errors = report.errors,
            "cycle finished"
        );
        Ok(report)
    }
}

fn tally(report: &mut CycleReport, done: Result<Result<TriggerOutcome, StoreError>, JoinError>) {
    match done {
        Ok(Ok(outcome)) => report.record(outcome),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "candidate abandoned on store error");
            report.record_error();
        }
        Err(err) => {
            tracing::error!(error = %err, "candidate task panicked");
            report.record_error();
        }
    }
}
