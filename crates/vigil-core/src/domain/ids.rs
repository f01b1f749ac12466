//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! Runner と Cycle は ULID で識別します。`Id<T>` のマーカー型 `T` は
//! 実行時には使わない（PhantomData）ので、RunnerId と CycleId は
//! 同じ 16 bytes のまま、コンパイル時に混同できません。
//!
//! `AccountId` だけは外部の enrollment が採番する opaque key なので、
//! ULID ではなく文字列の newtype です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Number of leading characters kept by [`AccountId::redacted`].
const REDACTED_PREFIX_LEN: usize = 5;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"runner-", "cycle-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse the Display form (`runner-01H...`) or a bare ULID string.
    pub fn parse(value: &str) -> Option<Self> {
        let raw = value.strip_prefix(T::prefix()).unwrap_or(value);
        Ulid::from_string(raw).ok().map(Self::from_ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Runner のマーカー型（1 プロセス = 1 runner）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Runner {}

impl IdMarker for Runner {
    fn prefix() -> &'static str {
        "runner-"
    }
}

/// Cycle のマーカー型（scan → claim → deliver の 1 周）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cycle {}

impl IdMarker for Cycle {
    fn prefix() -> &'static str {
        "cycle-"
    }
}

/// Identifier of one engine process; recorded as `claimed_by` on claims.
pub type RunnerId = Id<Runner>;

/// Identifier of one scan/trigger cycle (used for log correlation).
pub type CycleId = Id<Cycle>;

/// Opaque identity of a protected account.
///
/// Ordering is lexicographic; the store paginates on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe form: the first few characters followed by an ellipsis.
    pub fn redacted(&self) -> String {
        let mut chars = self.0.chars();
        let head: String = chars.by_ref().take(REDACTED_PREFIX_LEN).collect();
        if chars.next().is_some() {
            format!("{head}…")
        } else {
            head
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let runner = RunnerId::from_ulid(Ulid::new());
        let cycle = CycleId::from_ulid(Ulid::new());

        assert!(runner.to_string().starts_with("runner-"));
        assert!(cycle.to_string().starts_with("cycle-"));

        // let _: RunnerId = cycle; // <- does not compile
    }

    #[test]
    fn parse_accepts_display_form_and_bare_ulid() {
        let ulid = Ulid::new();
        let runner = RunnerId::from_ulid(ulid);

        assert_eq!(RunnerId::parse(&runner.to_string()), Some(runner));
        assert_eq!(RunnerId::parse(&ulid.to_string()), Some(runner));
        assert_eq!(RunnerId::parse("runner-not-a-ulid"), None);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<RunnerId>(), size_of::<Ulid>());
        assert_eq!(size_of::<CycleId>(), 16);
    }

    #[test]
    fn account_id_redaction_keeps_prefix_only() {
        assert_eq!(AccountId::new("cred-8f3a2b1c").redacted(), "cred-…");
        assert_eq!(AccountId::new("abc").redacted(), "abc");
        assert_eq!(AccountId::new("abcde").redacted(), "abcde");
    }

    #[test]
    fn account_id_serializes_as_plain_string() {
        let id = AccountId::new("acct-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acct-1\"");
    }
}
