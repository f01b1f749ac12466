//! SQLite-backed account store.
//!
//! The compare-and-swap is a single `UPDATE ... WHERE identity = ? AND
//! trigger_state = ? AND claim_epoch = ?`; SQLite serializes writers, so two
//! processes sharing the file cannot both see `changes() == 1` for the same
//! guard. Timestamps are stored as epoch milliseconds.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::app::status::StateCounts;
use crate::domain::{
    AccountId, AccountRecord, CasOutcome, ConditionalUpdate, EligibilityQuery, NewAccount,
    RunnerId, StoreError, TriggerState,
};
use crate::ports::account_store::{ensure_valid_transition, AccountStore, Page, PageRequest};
use crate::ports::ALERT_TARGET;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = "identity, last_activity_ms, beneficiary_contact, payload_reference, \
     trigger_state, claim_epoch, delivery_attempts, triggered_at_ms, claimed_at_ms, claimed_by, \
     last_error, updated_at_ms";

#[derive(Clone)]
pub struct SqliteAccountStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccountStore {
    /// Open or create the account database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| driver("open", e))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| driver("open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| driver("busy timeout", e))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| {
                StoreError::Unavailable("sqlite connection lock poisoned".to_string())
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {e}")))?
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            identity TEXT PRIMARY KEY,
            last_activity_ms INTEGER NOT NULL,
            beneficiary_contact TEXT NOT NULL,
            payload_reference TEXT NOT NULL,
            trigger_state TEXT NOT NULL DEFAULT 'untriggered',
            claim_epoch INTEGER NOT NULL DEFAULT 0,
            delivery_attempts INTEGER NOT NULL DEFAULT 0,
            triggered_at_ms INTEGER,
            claimed_at_ms INTEGER,
            claimed_by TEXT,
            last_error TEXT,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_state_activity
            ON accounts (trigger_state, last_activity_ms);
        ",
    )
    .map_err(|e| driver("migration", e))
}

fn driver(context: &str, e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("{context}: {e}"))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(identity: &str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt {
            identity: AccountId::new(identity),
            reason: format!("timestamp out of range: {ms}"),
        })
}

/// Columns as stored, before domain validation.
struct RawRecord {
    identity: String,
    last_activity_ms: i64,
    beneficiary_contact: String,
    payload_reference: String,
    trigger_state: String,
    claim_epoch: i64,
    delivery_attempts: i64,
    triggered_at_ms: Option<i64>,
    claimed_at_ms: Option<i64>,
    claimed_by: Option<String>,
    last_error: Option<String>,
    updated_at_ms: i64,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            last_activity_ms: row.get(1)?,
            beneficiary_contact: row.get(2)?,
            payload_reference: row.get(3)?,
            trigger_state: row.get(4)?,
            claim_epoch: row.get(5)?,
            delivery_attempts: row.get(6)?,
            triggered_at_ms: row.get(7)?,
            claimed_at_ms: row.get(8)?,
            claimed_by: row.get(9)?,
            last_error: row.get(10)?,
            updated_at_ms: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<AccountRecord, StoreError> {
        let id = self.identity.as_str();
        let corrupt = |reason: String| StoreError::Corrupt {
            identity: AccountId::new(id),
            reason,
        };

        let trigger_state = TriggerState::parse(&self.trigger_state)
            .ok_or_else(|| corrupt(format!("unknown trigger_state {:?}", self.trigger_state)))?;
        let claim_epoch = u64::try_from(self.claim_epoch)
            .map_err(|_| corrupt(format!("negative claim_epoch {}", self.claim_epoch)))?;
        let delivery_attempts = u32::try_from(self.delivery_attempts)
            .map_err(|_| corrupt(format!("bad delivery_attempts {}", self.delivery_attempts)))?;
        let claimed_by = match self.claimed_by.as_deref() {
            Some(raw) => Some(
                RunnerId::parse(raw).ok_or_else(|| corrupt(format!("bad claimed_by {raw:?}")))?,
            ),
            None => None,
        };

        Ok(AccountRecord {
            last_activity: ms_to_dt(id, self.last_activity_ms)?,
            triggered_at: self.triggered_at_ms.map(|ms| ms_to_dt(id, ms)).transpose()?,
            claimed_at: self.claimed_at_ms.map(|ms| ms_to_dt(id, ms)).transpose()?,
            updated_at: ms_to_dt(id, self.updated_at_ms)?,
            trigger_state,
            claim_epoch,
            delivery_attempts,
            claimed_by,
            beneficiary_contact: self.beneficiary_contact,
            payload_reference: self.payload_reference,
            last_error: self.last_error,
            identity: AccountId::new(self.identity),
        })
    }
}

fn skip_corrupt(err: &StoreError) {
    tracing::error!(
        target: ALERT_TARGET,
        error = %err,
        "undecodable account row skipped; operator action required"
    );
}

fn load_record(conn: &Connection, identity: &str) -> Result<Option<AccountRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM accounts WHERE identity = ?1");
    let raw = conn
        .query_row(&sql, params![identity], RawRecord::from_row)
        .optional()
        .map_err(|e| driver("get account", e))?;
    raw.map(RawRecord::into_record).transpose()
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn query_eligible(
        &self,
        query: &EligibilityQuery,
        page: PageRequest,
    ) -> Result<Page, StoreError> {
        let query = *query;
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM accounts
                 WHERE (?1 IS NULL OR identity > ?1)
                   AND last_activity_ms <= ?2
                   AND (
                        trigger_state = 'untriggered'
                     OR (trigger_state = 'failed' AND delivery_attempts < ?3)
                     OR (trigger_state = 'claimed' AND claimed_at_ms IS NOT NULL AND claimed_at_ms < ?4)
                   )
                 ORDER BY identity
                 LIMIT ?5"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| driver("prepare eligible query", e))?;
            let limit = i64::try_from(page.limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(
                    params![
                        page.after.as_ref().map(|a| a.as_str().to_string()),
                        dt_to_ms(query.inactive_since),
                        i64::from(query.retry_ceiling),
                        dt_to_ms(query.stale_claim_before),
                        limit,
                    ],
                    RawRecord::from_row,
                )
                .map_err(|e| driver("eligible query", e))?;

            // the cursor follows raw rows so an undecodable row is stepped over
            let mut records = Vec::new();
            let mut seen = 0;
            let mut last_identity = None;
            for row in rows {
                let raw = row.map_err(|e| driver("scan eligible row", e))?;
                seen += 1;
                last_identity = Some(AccountId::new(raw.identity.as_str()));
                match raw.into_record() {
                    Ok(record) => records.push(record),
                    Err(err) => skip_corrupt(&err),
                }
            }
            let next = if page.limit > 0 && seen == page.limit {
                last_identity
            } else {
                None
            };
            Ok(Page { records, next })
        })
        .await
    }

    async fn conditional_update(
        &self,
        update: &ConditionalUpdate,
    ) -> Result<CasOutcome, StoreError> {
        ensure_valid_transition(update)?;
        let update = update.clone();
        self.with_conn(move |conn| {
            let fields = &update.fields;
            let changed = conn
                .execute(
                    "UPDATE accounts
                     SET trigger_state = ?4,
                         claim_epoch = ?5,
                         delivery_attempts = ?6,
                         triggered_at_ms = ?7,
                         claimed_at_ms = ?8,
                         claimed_by = ?9,
                         last_error = ?10,
                         updated_at_ms = ?11
                     WHERE identity = ?1
                       AND trigger_state = ?2
                       AND claim_epoch = ?3
                       AND (?12 IS NULL OR last_activity_ms <= ?12)",
                    params![
                        update.identity.as_str(),
                        update.expected_state.as_str(),
                        update.expected_epoch as i64,
                        update.new_state.as_str(),
                        fields.claim_epoch as i64,
                        i64::from(fields.delivery_attempts),
                        fields.triggered_at.map(dt_to_ms),
                        fields.claimed_at.map(dt_to_ms),
                        fields.claimed_by.map(|r| r.to_string()),
                        fields.last_error,
                        dt_to_ms(fields.updated_at),
                        update.inactive_since.map(dt_to_ms),
                    ],
                )
                .map_err(|e| driver("conditional update", e))?;

            Ok(if changed == 1 {
                CasOutcome::Applied
            } else {
                CasOutcome::Conflict
            })
        })
        .await
    }

    async fn get(&self, identity: &AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let identity = identity.as_str().to_string();
        self.with_conn(move |conn| load_record(conn, &identity)).await
    }

    async fn insert(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<AccountRecord, StoreError> {
        let record = AccountRecord::new(account, now);
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO accounts
                 (identity, last_activity_ms, beneficiary_contact, payload_reference,
                  trigger_state, claim_epoch, delivery_attempts, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
                params![
                    record.identity.as_str(),
                    dt_to_ms(record.last_activity),
                    record.beneficiary_contact,
                    record.payload_reference,
                    record.trigger_state.as_str(),
                    dt_to_ms(record.updated_at),
                ],
            );
            match inserted {
                Ok(_) => Ok(record),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists(record.identity))
                }
                Err(e) => Err(driver("insert account", e)),
            }
        })
        .await
    }

    async fn touch(&self, identity: &AccountId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let identity = identity.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE accounts SET last_activity_ms = MAX(last_activity_ms, ?2) WHERE identity = ?1",
                params![identity, dt_to_ms(at)],
            )
            .map(|changed| changed == 1)
            .map_err(|e| driver("touch account", e))
        })
        .await
    }

    async fn counts(&self, retry_ceiling: u32) -> Result<StateCounts, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT trigger_state, delivery_attempts >= ?1, COUNT(*)
                     FROM accounts
                     GROUP BY trigger_state, delivery_attempts >= ?1",
                )
                .map_err(|e| driver("prepare counts", e))?;
            let rows = stmt
                .query_map(params![i64::from(retry_ceiling)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(|e| driver("counts", e))?;

            let mut counts = StateCounts::default();
            for row in rows {
                let (state, exhausted, n) = row.map_err(|e| driver("scan counts", e))?;
                let n = usize::try_from(n).unwrap_or(0);
                match TriggerState::parse(&state) {
                    Some(TriggerState::Untriggered) => counts.untriggered += n,
                    Some(TriggerState::Claimed) => counts.claimed += n,
                    Some(TriggerState::Delivered) => counts.delivered += n,
                    Some(TriggerState::Failed) if exhausted => counts.failed_permanent += n,
                    Some(TriggerState::Failed) => counts.failed_retryable += n,
                    None => tracing::warn!(state = %state, rows = n, "unknown trigger_state in counts"),
                }
            }
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TriggerPolicy;
    use chrono::Duration as ChronoDuration;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn account(id: &str, days_silent: i64) -> NewAccount {
        NewAccount {
            identity: AccountId::new(id),
            last_activity: now() - ChronoDuration::days(days_silent),
            beneficiary_contact: format!("{id}@heir.example"),
            payload_reference: format!("vault/{id}"),
        }
    }

    fn runner() -> RunnerId {
        RunnerId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let inserted = store.insert(account("a", 45), now()).await.unwrap();
        let loaded = store.get(&inserted.identity).await.unwrap().unwrap();
        assert_eq!(loaded, inserted);
        assert!(store.get(&AccountId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_enrollment_is_rejected() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.insert(account("a", 1), now()).await.unwrap();
        let err = store.insert(account("a", 1), now()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn eligible_query_matches_domain_predicate() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let policy = TriggerPolicy::default_v1();
        let query = policy.query_at(now());

        store.insert(account("active", 10), now()).await.unwrap();
        let inactive = store.insert(account("inactive", 45), now()).await.unwrap();

        // claimed 1h ago: stale; claimed 1m ago: fresh
        for (id, claimed_ago) in [
            ("stale", ChronoDuration::hours(1)),
            ("fresh", ChronoDuration::minutes(1)),
        ] {
            let rec = store.insert(account(id, 45), now()).await.unwrap();
            let claim = rec.claim(runner(), now() - claimed_ago, &query, true);
            assert!(store.conditional_update(&claim).await.unwrap().is_applied());
        }

        let page = store
            .query_eligible(&query, PageRequest::first(10))
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["inactive", "stale"]);

        for record in &page.records {
            assert!(record.eligibility(&query).is_some());
        }
        assert_eq!(page.records[0], inactive);
    }

    #[tokio::test]
    async fn failed_below_ceiling_is_retryable_and_exhausted_is_not() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let policy = TriggerPolicy::default_v1();
        let query = policy.query_at(now());

        for (id, attempts) in [("retry", 1), ("dead", 3)] {
            let mut rec = store.insert(account(id, 45), now()).await.unwrap();
            for _ in 0..attempts {
                let claim = rec.claim(runner(), now(), &query, true);
                assert!(store.conditional_update(&claim).await.unwrap().is_applied());
                rec.apply(&claim);
                let fail = rec.fail("bounce", now());
                assert!(store.conditional_update(&fail).await.unwrap().is_applied());
                rec.apply(&fail);
            }
        }

        let page = store
            .query_eligible(&query, PageRequest::first(10))
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["retry"]);

        let counts = store.counts(policy.retry_ceiling).await.unwrap();
        assert_eq!(counts.failed_retryable, 1);
        assert_eq!(counts.failed_permanent, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn stale_epoch_finalize_is_a_conflict() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let query = TriggerPolicy::default_v1().query_at(now());
        let mut rec = store.insert(account("a", 45), now()).await.unwrap();

        let claim = rec.claim(runner(), now(), &query, true);
        assert!(store.conditional_update(&claim).await.unwrap().is_applied());
        rec.apply(&claim);

        // another runner reclaims after the timeout
        let reclaim = rec.claim(runner(), now(), &query, true);
        assert!(store.conditional_update(&reclaim).await.unwrap().is_applied());

        let late = rec.deliver(now());
        assert_eq!(store.conditional_update(&late).await.unwrap(), CasOutcome::Conflict);
        assert_eq!(store.conditional_update(&late).await.unwrap(), CasOutcome::Conflict);

        let stored = store.get(&rec.identity).await.unwrap().unwrap();
        assert_eq!(stored.trigger_state, TriggerState::Claimed);
        assert_eq!(stored.claim_epoch, 2);
    }

    #[tokio::test]
    async fn check_in_between_scan_and_claim_wins() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let query = TriggerPolicy::default_v1().query_at(now());
        let rec = store.insert(account("a", 45), now()).await.unwrap();

        assert!(store.touch(&rec.identity, now()).await.unwrap());
        let claim = rec.claim(runner(), now(), &query, true);
        assert_eq!(store.conditional_update(&claim).await.unwrap(), CasOutcome::Conflict);
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let query = TriggerPolicy::default_v1().query_at(now());
        let snapshot = store.insert(account("a", 45), now()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let claim = snapshot.claim(runner(), now(), &query, true);
            handles.push(tokio::spawn(async move {
                store.conditional_update(&claim).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    fn corrupt_claimed_by(store: &SqliteAccountStore, id: &str) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET claimed_by = 'garbage' WHERE identity = ?1",
            params![id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn undecodable_row_is_skipped_and_cursor_moves_past_it() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let query = TriggerPolicy::default_v1().query_at(now());
        store.insert(account("a-bad", 45), now()).await.unwrap();
        store.insert(account("b-good", 45), now()).await.unwrap();
        corrupt_claimed_by(&store, "a-bad");

        let page = store
            .query_eligible(&query, PageRequest::first(10))
            .await
            .unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["b-good"]);

        // a page holding only the bad row still hands back a cursor
        let first = store
            .query_eligible(&query, PageRequest::first(1))
            .await
            .unwrap();
        assert!(first.records.is_empty());
        assert_eq!(first.next, Some(AccountId::new("a-bad")));

        let second = store
            .query_eligible(
                &query,
                PageRequest {
                    after: first.next,
                    limit: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.records[0].identity.as_str(), "b-good");
    }

    #[tokio::test]
    async fn cycle_delivers_around_an_undecodable_row() {
        use crate::ports::RecordingEventSink;
        use crate::testing::{self, new_account, t0, ScriptedNotifier};

        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        // "a-bad" sorts first and fills a whole page of three on its own
        for id in ["a-bad", "a-bad-2", "a-bad-3", "b-good"] {
            store
                .insert(new_account(id, t0() - ChronoDuration::days(45)), t0())
                .await
                .unwrap();
        }
        for id in ["a-bad", "a-bad-2", "a-bad-3"] {
            corrupt_claimed_by(&store, id);
        }

        let notifier = Arc::new(ScriptedNotifier::succeeding());
        let runner = testing::runner(
            store.clone(),
            notifier.clone(),
            Arc::new(RecordingEventSink::new()),
            2,
        );
        let report = runner.run_cycle().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(notifier.calls(), 1);
        let good = store.get(&AccountId::new("b-good")).await.unwrap().unwrap();
        assert_eq!(good.trigger_state, TriggerState::Delivered);
    }
}
