//! AccountStore port - アカウントの正本（source of truth）
//!
//! 永続状態はすべてここにあり、engine はプロセス内に権威ある状態を持ちません。
//!
//! # 設計原則
//! - 状態変更は `conditional_update`（compare-and-swap）だけ
//! - プロセス内ロックでは足りない（複数インスタンスが同時に動く）
//! - query は read-only、ページング必須（unbounded memory を避ける）
//!
//! # 実装
//! - `impls::InMemoryAccountStore`: テスト・開発用
//! - `impls::SqliteAccountStore`: 単一ノード本番用

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::StateCounts;
use crate::domain::{
    AccountId, AccountRecord, CasOutcome, ConditionalUpdate, EligibilityQuery, NewAccount,
    StoreError,
};

/// Keyset page request: records with `identity > after`, at most `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<AccountId>,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }
}

/// One page of eligible records, ordered by identity.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<AccountRecord>,

    /// Token for the next page; `None` when this was the last page.
    pub next: Option<AccountId>,
}

impl Page {
    /// Build a page from records already sorted and truncated to `limit`.
    pub fn from_sorted(records: Vec<AccountRecord>, limit: usize) -> Self {
        let next = if limit > 0 && records.len() == limit {
            records.last().map(|r| r.identity.clone())
        } else {
            None
        };
        Self { records, next }
    }
}

/// Record Store Adapter contract.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Records matching the eligibility predicate, one page at a time.
    ///
    /// A row that cannot be decoded is logged and left out of `records`,
    /// but still advances `next`; a page may be short or empty while more
    /// pages follow.
    async fn query_eligible(
        &self,
        query: &EligibilityQuery,
        page: PageRequest,
    ) -> Result<Page, StoreError>;

    /// Atomic guarded write. A guard mismatch is `Ok(CasOutcome::Conflict)`.
    ///
    /// Implementations must reject edges the state machine does not allow
    /// with `StoreError::InvalidTransition` before touching storage.
    async fn conditional_update(
        &self,
        update: &ConditionalUpdate,
    ) -> Result<CasOutcome, StoreError>;

    async fn get(&self, identity: &AccountId) -> Result<Option<AccountRecord>, StoreError>;

    /// Enrollment. Not used by the engine itself.
    async fn insert(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<AccountRecord, StoreError>;

    /// Liveness signal from the owner. Returns false for unknown accounts.
    async fn touch(&self, identity: &AccountId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Counts per state; `retry_ceiling` splits retryable from permanent failures.
    async fn counts(&self, retry_ceiling: u32) -> Result<StateCounts, StoreError>;
}

/// Shared guard for adapters: reject illegal edges up front.
pub(crate) fn ensure_valid_transition(update: &ConditionalUpdate) -> Result<(), StoreError> {
    if update.is_valid_transition() {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: update.expected_state,
            to: update.new_state,
        })
    }
}
