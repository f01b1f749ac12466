//! Scheduler - 一定間隔で Runner::run_cycle を回す
//!
//! # 停止
//! - `request_shutdown()` は新しいサイクルの開始だけを止める
//! - 実行中のサイクルは最後まで走る（claim 済みの候補を放置しない）
//! - handle を drop した場合も sender が閉じるのでループは抜ける

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::runner::Runner;

pub struct Scheduler {
    runner: Arc<Runner>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<Runner>, interval: Duration) -> Self {
        Self { runner, interval }
    }

    /// Spawn the loop. The first cycle starts immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler_loop(self.runner, self.interval, shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }
}

/// Scheduler handle.
/// - `request_shutdown()` で新規サイクルを止める
/// - `shutdown_and_join()` で実行中サイクルの完了まで待つ
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait. Returns the number of cycles that ran.
    pub async fn shutdown_and_join(self) -> u64 {
        self.request_shutdown();
        match self.join.await {
            Ok(cycles) => cycles,
            Err(err) => {
                tracing::error!(error = %err, "scheduler task panicked");
                0
            }
        }
    }
}

async fn scheduler_loop(
    runner: Arc<Runner>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0;

    tracing::info!(interval_secs = period.as_secs(), "scheduler started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        // not raced against shutdown: a started cycle always finishes
        if let Err(err) = runner.run_cycle().await {
            tracing::warn!(error = %err, "cycle failed; retrying next interval");
        }
        cycles += 1;
    }
    tracing::info!(cycles, "scheduler stopped");
    cycles
}
