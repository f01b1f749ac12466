//! Domain model (ids, state, account records, policy, outcomes, events, errors).

pub mod account;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod policy;
pub mod state;

pub use self::account::{AccountRecord, CasOutcome, ConditionalUpdate, NewAccount, UpdateFields};
pub use self::errors::{NotifyError, StoreError};
pub use self::events::DomainEvent;
pub use self::ids::{AccountId, CycleId, Id, IdMarker, RunnerId};
pub use self::outcome::{CycleReport, TriggerOutcome};
pub use self::policy::{Eligibility, EligibilityQuery, TriggerPolicy};
pub use self::state::TriggerState;
