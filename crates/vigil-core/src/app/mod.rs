//! App - アプリケーション層
//!
//! ports を組み合わせて trigger engine を実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: engine の構築とワイヤリング
//! - **ScanPlanner**: 候補アカウントの抽出（read-only, keyset paging）
//! - **TriggerMachine**: claim → deliver → finalize
//! - **Runner**: 1 サイクル分の並列実行（bounded worker pool）
//! - **Scheduler**: 周期実行と graceful shutdown

pub mod builder;
pub mod planner;
pub mod runner;
pub mod scheduler;
pub mod status;
pub mod trigger;

pub use self::builder::{BuildError, Engine, EngineBuilder};
pub use self::planner::{Candidate, CandidateScan, ScanPlanner};
pub use self::runner::Runner;
pub use self::scheduler::{Scheduler, SchedulerHandle};
pub use self::status::StateCounts;
pub use self::trigger::TriggerMachine;
