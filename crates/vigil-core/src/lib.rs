//! vigil-core
//!
//! Dead man's switch trigger engine: finds accounts whose owners have gone
//! silent past the inactivity threshold and delivers their sealed payload
//! reference to the beneficiary, at most one runner at a time per account.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, account record, policy, outcome, events, errors）
//! - **ports**: 抽象化レイヤー（AccountStore, Notifier, EventSink, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（planner, trigger, runner, scheduler, builder）
//! - **impls**: 実装（InMemoryAccountStore, SqliteAccountStore, WebhookNotifier, LogNotifier）
//! - **config**: TOML 設定と環境変数オーバーライド
//!
//! # 不変条件
//! - 状態遷移はすべて `(state, claim_epoch)` を guard にした conditional update
//! - 1 つの epoch を finalize できるのは claim に勝った runner だけ
//! - Delivered は終端状態

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::app::{Engine, EngineBuilder};
pub use crate::config::{ConfigError, EngineConfig};
