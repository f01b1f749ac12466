//! ScanPlanner - 候補アカウントの抽出
//!
//! # フロー
//! 1. cycle 開始時刻で EligibilityQuery を固定（point-in-time snapshot）
//! 2. AccountStore::query_eligible() を keyset paging で読む
//! 3. 1 ページずつ Runner に渡す（全件をメモリに載せない）
//!
//! Read-only: planner は何も書き込みません。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{
    AccountId, AccountRecord, Eligibility, EligibilityQuery, StoreError, TriggerPolicy,
};
use crate::ports::{AccountStore, PageRequest};

/// A record snapshot plus the reason it was picked.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub record: AccountRecord,
    pub eligibility: Eligibility,
}

pub struct ScanPlanner {
    store: Arc<dyn AccountStore>,
    page_size: usize,
}

impl ScanPlanner {
    pub fn new(store: Arc<dyn AccountStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Start a paged scan for one cycle.
    pub fn scan(&self, query: EligibilityQuery) -> CandidateScan {
        CandidateScan {
            store: Arc::clone(&self.store),
            query,
            after: None,
            page_size: self.page_size,
            done: false,
        }
    }

    /// Collect every candidate at `now`. Unordered by contract; in practice
    /// identity order.
    pub async fn find_candidates(
        &self,
        policy: &TriggerPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, StoreError> {
        let mut scan = self.scan(policy.query_at(now));
        let mut out = Vec::new();
        while let Some(page) = scan.next_page().await? {
            out.extend(page);
        }
        Ok(out)
    }
}

/// Cursor over the pages of one scan.
pub struct CandidateScan {
    store: Arc<dyn AccountStore>,
    query: EligibilityQuery,
    after: Option<AccountId>,
    page_size: usize,
    done: bool,
}

impl CandidateScan {
    pub fn query(&self) -> &EligibilityQuery {
        &self.query
    }

    /// Next page of candidates, or `None` once the scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Candidate>>, StoreError> {
        // a page can come back empty while the cursor still moves, e.g. when
        // the store stepped over rows it could not decode
        while !self.done {
            let request = PageRequest {
                after: self.after.take(),
                limit: self.page_size,
            };
            let page = self.store.query_eligible(&self.query, request).await?;
            self.done = page.next.is_none();
            self.after = page.next;

            let query = self.query;
            let candidates: Vec<Candidate> = page
                .records
                .into_iter()
                .filter_map(|record| match record.eligibility(&query) {
                    Some(eligibility) => Some(Candidate { record, eligibility }),
                    None => {
                        // timestamp rounding in the store can return boundary rows
                        tracing::debug!(
                            account = %record.identity.redacted(),
                            "store returned ineligible row; skipped"
                        );
                        None
                    }
                })
                .collect();
            if !candidates.is_empty() {
                return Ok(Some(candidates));
            }
        }
        Ok(None)
    }
}
