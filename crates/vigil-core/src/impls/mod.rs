//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryAccountStore**: テスト・開発用の record store
//! - **SqliteAccountStore**: 単一ノード本番用の record store
//! - **WebhookNotifier**: HTTP POST による通知
//! - **LogNotifier**: dry-run 用

pub mod inmem_store;
pub mod log_notifier;
pub mod sqlite_store;
pub mod webhook;

pub use self::inmem_store::InMemoryAccountStore;
pub use self::log_notifier::LogNotifier;
pub use self::sqlite_store::SqliteAccountStore;
pub use self::webhook::WebhookNotifier;
