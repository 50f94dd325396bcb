// =============================================================================
// Configuration — the monitored account set
// =============================================================================
//
// Loaded once at startup from a JSON file, or from the fixed-name environment
// form for a single account. Every optional field has a serde default so that
// older config files keep loading after new fields are added. Platform
// credentials never live here; adapters read them from the environment.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;
use crate::rules::Rules;
use crate::types::Platform;

fn default_check_interval() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

/// Where an account's Rules come from when not relying on the store lookup:
/// a preset referenced by firm name, or a full inline Rules object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulesRef {
    Preset(String),
    Inline(Rules),
}

/// One monitored account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Operator-facing label, used in logs, panels, and the status view.
    pub label: String,
    pub firm: String,
    #[serde(default)]
    pub program_id: Option<String>,
    pub platform: Platform,
    pub account_id: String,
    /// Initial funded balance; the total-drawdown reference.
    pub starting_balance: f64,
    /// Seconds between snapshots for this account.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Preset name or inline Rules. Absent means: resolve via the store by
    /// program id, falling back to the firm's preset.
    #[serde(default)]
    pub rules: Option<RulesRef>,
}

impl AccountConfig {
    /// Explicit preset reference for the resolver's preset tier. The
    /// database tier always runs under the account's real firm.
    pub fn preset_name(&self) -> Option<&str> {
        match &self.rules {
            Some(RulesRef::Preset(name)) => Some(name),
            _ => None,
        }
    }

    /// Inline custom Rules for the resolver's third tier, when configured.
    pub fn custom_rules(&self) -> Option<&Rules> {
        match &self.rules {
            Some(RulesRef::Inline(rules)) => Some(rules),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| {
            Err(ConfigError::InvalidAccount {
                label: self.label.clone(),
                reason,
            })
        };

        if self.label.trim().is_empty() {
            return fail("label must not be empty".to_string());
        }
        if self.account_id.trim().is_empty() {
            return fail("account_id must not be empty".to_string());
        }
        if !(self.starting_balance.is_finite() && self.starting_balance > 0.0) {
            return fail(format!(
                "starting_balance must be positive, got {}",
                self.starting_balance
            ));
        }
        if self.check_interval == 0 {
            return fail("check_interval must be at least 1 second".to_string());
        }
        if let Some(RulesRef::Inline(rules)) = &self.rules {
            rules.validate()?;
        }
        Ok(())
    }
}

/// Top-level configuration: the account set plus the optional rule store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub accounts: Vec<AccountConfig>,
    /// SQLite URL of the extracted-rules store, e.g. `sqlite://rules.db`.
    #[serde(default)]
    pub rule_store_url: Option<String>,
}

impl MonitorConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        config.validate()?;
        info!(
            path = %path.display(),
            accounts = config.accounts.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Build a single-account configuration from the fixed-name environment
    /// form (`PROPWATCH_ACCOUNT_*`).
    pub fn from_env() -> Result<Self, ConfigError> {
        fn required(name: &str) -> Result<String, ConfigError> {
            std::env::var(name).map_err(|_| ConfigError::MissingEnv {
                name: name.to_string(),
            })
        }

        fn parsed<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }

        let platform_raw = required("PROPWATCH_ACCOUNT_PLATFORM")?;
        let balance_raw = required("PROPWATCH_ACCOUNT_STARTING_BALANCE")?;

        let account = AccountConfig {
            label: required("PROPWATCH_ACCOUNT_LABEL")?,
            firm: required("PROPWATCH_ACCOUNT_FIRM")?,
            program_id: std::env::var("PROPWATCH_ACCOUNT_PROGRAM_ID").ok(),
            platform: parsed("PROPWATCH_ACCOUNT_PLATFORM", &platform_raw)?,
            account_id: required("PROPWATCH_ACCOUNT_ID")?,
            starting_balance: parsed("PROPWATCH_ACCOUNT_STARTING_BALANCE", &balance_raw)?,
            check_interval: match std::env::var("PROPWATCH_ACCOUNT_CHECK_INTERVAL") {
                Ok(raw) => parsed("PROPWATCH_ACCOUNT_CHECK_INTERVAL", &raw)?,
                Err(_) => default_check_interval(),
            },
            enabled: true,
            rules: std::env::var("PROPWATCH_ACCOUNT_PRESET")
                .ok()
                .map(RulesRef::Preset),
        };

        let config = Self {
            accounts: vec![account],
            rule_store_url: std::env::var("PROPWATCH_RULE_STORE_URL").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for account in &self.accounts {
            account.validate()?;
        }
        Ok(())
    }

    /// The accounts the supervisor should actually run.
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}
