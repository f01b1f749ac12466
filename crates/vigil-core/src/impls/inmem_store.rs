//! InMemoryAccountStore - 開発・テスト用の record store
//!
//! # 実装詳細
//! - BTreeMap<AccountId, AccountRecord> で identity 順に保持（keyset paging）
//! - tokio::sync::Mutex で排他。guard の確認と書き込みは同じロック内で完結
//! - `set_unavailable` で障害注入（store unavailable のテスト用）

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::StateCounts;
use crate::domain::{
    AccountId, AccountRecord, CasOutcome, ConditionalUpdate, EligibilityQuery, NewAccount,
    StoreError,
};
use crate::ports::account_store::{ensure_valid_transition, AccountStore, Page, PageRequest};

/// In-memory record store. Clones share the same records.
#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    records: Arc<Mutex<BTreeMap<AccountId, AccountRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record as-is (tests use this to stage Claimed / Failed states).
    pub async fn put(&self, record: AccountRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.identity.clone(), record);
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn query_eligible(
        &self,
        query: &EligibilityQuery,
        page: PageRequest,
    ) -> Result<Page, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;

        let matching: Vec<AccountRecord> = records
            .values()
            .filter(|r| page.after.as_ref().is_none_or(|after| &r.identity > after))
            .filter(|r| r.eligibility(query).is_some())
            .take(page.limit)
            .cloned()
            .collect();

        Ok(Page::from_sorted(matching, page.limit))
    }

    async fn conditional_update(
        &self,
        update: &ConditionalUpdate,
    ) -> Result<CasOutcome, StoreError> {
        ensure_valid_transition(update)?;
        self.check_available()?;
        let mut records = self.records.lock().await;

        let Some(record) = records.get_mut(&update.identity) else {
            return Ok(CasOutcome::Conflict);
        };
        if !record.matches(update) {
            return Ok(CasOutcome::Conflict);
        }
        record.apply(update);
        Ok(CasOutcome::Applied)
    }

    async fn get(&self, identity: &AccountId) -> Result<Option<AccountRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        Ok(records.get(identity).cloned())
    }

    async fn insert(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<AccountRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        if records.contains_key(&account.identity) {
            return Err(StoreError::AlreadyExists(account.identity));
        }
        let record = AccountRecord::new(account, now);
        records.insert(record.identity.clone(), record.clone());
        Ok(record)
    }

    async fn touch(&self, identity: &AccountId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        match records.get_mut(identity) {
            Some(record) => {
                if at > record.last_activity {
                    record.last_activity = at;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn counts(&self, retry_ceiling: u32) -> Result<StateCounts, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        let mut counts = StateCounts::default();
        for record in records.values() {
            counts.add(record, retry_ceiling);
        }
        Ok(counts)
    }
}
