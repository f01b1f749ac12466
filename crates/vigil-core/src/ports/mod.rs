//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。engine のコアは trait だけに依存し、
//! record store や通知手段の実装は `impls` に置きます。

pub mod account_store;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod notifier;

pub use self::account_store::{AccountStore, Page, PageRequest};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, RecordingEventSink, TracingEventSink, ALERT_TARGET};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{NoticeTemplate, Notifier, TriggerNotice};
