//! Engine configuration (TOML file + environment overrides).
//!
//! ```toml
//! [policy]
//! inactivity_threshold_secs = 2592000
//! retry_ceiling = 3
//! claim_timeout_secs = 900
//!
//! [runner]
//! cycle_interval_secs = 300
//! workers = 4
//! page_size = 100
//!
//! [store]
//! sqlite_path = "vigil.db"
//!
//! [notifier]
//! kind = "webhook"
//! webhook_url = "https://mail-gateway.internal/send"
//! ```
//!
//! Every key is optional. `VIGIL_SQLITE_PATH`, `VIGIL_WEBHOOK_URL` and
//! `VIGIL_REDEEM_URL` override the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::EngineBuilder;
use crate::domain::{StoreError, TriggerPolicy};
use crate::impls::{LogNotifier, SqliteAccountStore, WebhookNotifier};
use crate::ports::{NoticeTemplate, Notifier};

pub const ENV_SQLITE_PATH: &str = "VIGIL_SQLITE_PATH";
pub const ENV_WEBHOOK_URL: &str = "VIGIL_WEBHOOK_URL";
pub const ENV_REDEEM_URL: &str = "VIGIL_REDEEM_URL";

const MAX_DURATION_SECS: u64 = TriggerPolicy::MAX_DURATION_SECS as u64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    /// Log the notice instead of sending it.
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_redeem_url")]
    pub redeem_url: String,
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_inactivity_threshold_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_claim_timeout_secs() -> u64 {
    15 * 60
}

fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_workers() -> usize {
    4
}

fn default_page_size() -> usize {
    100
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("vigil.db")
}

fn default_notifier_timeout_secs() -> u64 {
    10
}

fn default_redeem_url() -> String {
    NoticeTemplate::default().redeem_url
}

fn default_sender() -> String {
    NoticeTemplate::default().sender
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            retry_ceiling: default_retry_ceiling(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            workers: default_workers(),
            page_size: default_page_size(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            webhook_url: None,
            timeout_secs: default_notifier_timeout_secs(),
            redeem_url: default_redeem_url(),
            sender: default_sender(),
        }
    }
}

impl EngineConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `VIGIL_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_SQLITE_PATH) {
            self.store.sqlite_path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL) {
            self.notifier.webhook_url = Some(url);
        }
        if let Some(url) = lookup(ENV_REDEEM_URL) {
            self.notifier.redeem_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };
        if self.policy.inactivity_threshold_secs == 0 {
            return invalid("policy.inactivity_threshold_secs must be positive");
        }
        if self.policy.retry_ceiling == 0 {
            return invalid("policy.retry_ceiling must be at least 1");
        }
        if self.policy.claim_timeout_secs == 0 {
            return invalid("policy.claim_timeout_secs must be positive");
        }
        if self.policy.inactivity_threshold_secs > MAX_DURATION_SECS
            || self.policy.claim_timeout_secs > MAX_DURATION_SECS
        {
            return invalid("policy durations must be at most 100 years");
        }
        if self.runner.cycle_interval_secs == 0 {
            return invalid("runner.cycle_interval_secs must be positive");
        }
        if self.runner.workers == 0 {
            return invalid("runner.workers must be at least 1");
        }
        if self.runner.page_size == 0 {
            return invalid("runner.page_size must be at least 1");
        }
        if self.notifier.kind == NotifierKind::Webhook
            && self
                .notifier
                .webhook_url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            return invalid("notifier.webhook_url is required for kind = \"webhook\"");
        }
        Ok(())
    }

    pub fn policy(&self) -> TriggerPolicy {
        TriggerPolicy {
            inactivity_threshold: seconds(self.policy.inactivity_threshold_secs),
            retry_ceiling: self.policy.retry_ceiling,
            claim_timeout: seconds(self.policy.claim_timeout_secs),
        }
    }

    pub fn template(&self) -> NoticeTemplate {
        NoticeTemplate {
            sender: self.notifier.sender.clone(),
            redeem_url: self.notifier.redeem_url.clone(),
        }
    }

    /// Validate, open the store, build the notifier and pre-fill a builder.
    pub fn engine_builder(&self) -> Result<EngineBuilder, ConfigError> {
        self.validate()?;
        let store = self.store.open()?;
        Ok(EngineBuilder::new()
            .store(Arc::new(store))
            .notifier(self.notifier.build()?)
            .policy(self.policy())
            .template(self.template())
            .workers(self.runner.workers)
            .page_size(self.runner.page_size)
            .cycle_interval(Duration::from_secs(self.runner.cycle_interval_secs)))
    }
}

impl StoreConfig {
    pub fn open(&self) -> Result<SqliteAccountStore, StoreError> {
        SqliteAccountStore::open(&self.sqlite_path)
    }
}

impl NotifierConfig {
    pub fn build(&self) -> Result<Arc<dyn Notifier>, ConfigError> {
        match self.kind {
            NotifierKind::Log => Ok(Arc::new(LogNotifier)),
            NotifierKind::Webhook => {
                let url = self.webhook_url.clone().ok_or_else(|| {
                    ConfigError::Invalid("notifier.webhook_url is not set".to_string())
                })?;
                Ok(Arc::new(WebhookNotifier::new(
                    url,
                    Duration::from_secs(self.timeout_secs),
                )))
            }
        }
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.policy(), TriggerPolicy::default_v1());
        assert_eq!(config.runner.cycle_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [policy]
            retry_ceiling = 5

            [notifier]
            kind = "webhook"
            webhook_url = "https://hooks.example/send"
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.retry_ceiling, 5);
        assert_eq!(config.policy.claim_timeout_secs, 900);
        assert_eq!(config.notifier.kind, NotifierKind::Webhook);
        assert_eq!(config.notifier.timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_notifier_kind_is_a_parse_error() {
        let err = EngineConfig::from_toml("[notifier]\nkind = \"carrier-pigeon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[rstest]
    #[case::zero_threshold("[policy]\ninactivity_threshold_secs = 0")]
    #[case::zero_ceiling("[policy]\nretry_ceiling = 0")]
    #[case::zero_claim_timeout("[policy]\nclaim_timeout_secs = 0")]
    #[case::zero_interval("[runner]\ncycle_interval_secs = 0")]
    #[case::zero_workers("[runner]\nworkers = 0")]
    #[case::zero_page_size("[runner]\npage_size = 0")]
    #[case::absurd_threshold("[policy]\ninactivity_threshold_secs = 9000000000000")]
    #[case::webhook_without_url("[notifier]\nkind = \"webhook\"")]
    fn validate_rejects(#[case] toml: &str) {
        let config = EngineConfig::from_toml(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SQLITE_PATH, "/var/lib/vigil/accounts.db"),
            (ENV_WEBHOOK_URL, "https://hooks.example/override"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.store.sqlite_path,
            PathBuf::from("/var/lib/vigil/accounts.db")
        );
        assert_eq!(
            config.notifier.webhook_url.as_deref(),
            Some("https://hooks.example/override")
        );
        assert_eq!(config.notifier.redeem_url, default_redeem_url());
    }

    #[test]
    fn policy_converts_seconds() {
        let config = EngineConfig::from_toml(
            "[policy]\ninactivity_threshold_secs = 86400\nclaim_timeout_secs = 60",
        )
        .unwrap();
        let policy = config.policy();
        assert_eq!(policy.threshold_days(), 1);
        assert_eq!(policy.claim_timeout, chrono::Duration::minutes(1));
    }

    #[test]
    fn webhook_kind_builds_a_notifier() {
        let config = NotifierConfig {
            kind: NotifierKind::Webhook,
            webhook_url: Some("https://hooks.example/send".to_string()),
            ..NotifierConfig::default()
        };
        assert!(config.build().is_ok());

        let missing = NotifierConfig {
            kind: NotifierKind::Webhook,
            ..NotifierConfig::default()
        };
        assert!(matches!(missing.build(), Err(ConfigError::Invalid(_))));
    }
}
