//! Ledger configuration.
//!
//! ## Load order (later overrides earlier)
//! 1. Default values
//! 2. TOML file, when a path is given and exists
//! 3. Environment variables (`STOCKLEDGER_NEGATIVE_STOCK`,
//!    `STOCKLEDGER_CONSUMPTION_ORDER`, `STOCKLEDGER_LOCK_TIMEOUT_MS`)
//!
//! ```toml
//! negative_stock = "forbid"     # allow | forbid
//! consumption_order = "fifo"    # fifo | lifo
//! lock_timeout_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::ConsumptionOrder;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 500;

pub const NEGATIVE_STOCK_ENV: &str = "STOCKLEDGER_NEGATIVE_STOCK";
pub const CONSUMPTION_ORDER_ENV: &str = "STOCKLEDGER_CONSUMPTION_ORDER";
pub const LOCK_TIMEOUT_ENV: &str = "STOCKLEDGER_LOCK_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Whether outbound movements may drive a position below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    /// Shortfalls are recorded and reported through valuation.
    #[default]
    Allow,
    /// Shortfalls reject the movement with `InsufficientStock`.
    Forbid,
}

impl NegativeStockPolicy {
    pub fn permits_shortfall(self) -> bool {
        matches!(self, NegativeStockPolicy::Allow)
    }
}

impl std::str::FromStr for NegativeStockPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(NegativeStockPolicy::Allow),
            "forbid" => Ok(NegativeStockPolicy::Forbid),
            other => Err(ConfigError::Invalid(format!(
                "unknown negative stock policy '{other}' (expected allow or forbid)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub negative_stock: NegativeStockPolicy,
    pub consumption_order: ConsumptionOrder,
    /// Upper bound on waiting for a key lock before giving up with a retriable conflict.
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_stock: NegativeStockPolicy::default(),
            consumption_order: ConsumptionOrder::default(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl LedgerConfig {
    /// Defaults, then the file at `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`LedgerConfig::load`] with overrides read through `lookup` instead of
    /// the process environment.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                info!(?path, "loading ledger config from file");
                let contents = std::fs::read_to_string(path)?;
                config = Self::from_toml_str(&contents)?;
            } else {
                debug!(?path, "config file not found, using defaults");
            }
        }

        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_negative_stock(mut self, policy: NegativeStockPolicy) -> Self {
        self.negative_stock = policy;
        self
    }

    pub fn with_consumption_order(mut self, order: ConsumptionOrder) -> Self {
        self.consumption_order = order;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Unparseable values are logged and ignored. Parsed values are not
    /// validated here; `load_with` validates the merged result.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(policy) = lookup(NEGATIVE_STOCK_ENV) {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "overriding negative stock policy from environment");
                    self.negative_stock = parsed;
                }
                Err(e) => warn!(var = NEGATIVE_STOCK_ENV, error = %e, "ignoring environment override"),
            }
        }

        if let Some(order) = lookup(CONSUMPTION_ORDER_ENV) {
            match order.parse() {
                Ok(parsed) => self.consumption_order = parsed,
                Err(e) => warn!(var = CONSUMPTION_ORDER_ENV, error = %e, "ignoring environment override"),
            }
        }

        if let Some(timeout) = lookup(LOCK_TIMEOUT_ENV) {
            match timeout.trim().parse::<u64>() {
                Ok(ms) => self.lock_timeout_ms = ms,
                Err(_) => warn!(var = LOCK_TIMEOUT_ENV, value = %timeout, "ignoring environment override"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_permit_negative_stock_and_consume_fifo() {
        let config = LedgerConfig::default();
        assert_eq!(config.negative_stock, NegativeStockPolicy::Allow);
        assert_eq!(config.consumption_order, ConsumptionOrder::Fifo);
        assert_eq!(config.lock_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn parses_partial_toml() {
        let config = LedgerConfig::from_toml_str(
            r#"
            negative_stock = "forbid"
            consumption_order = "lifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.negative_stock, NegativeStockPolicy::Forbid);
        assert_eq!(config.consumption_order, ConsumptionOrder::Lifo);
        assert_eq!(config.lock_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = LedgerConfig::from_toml_str("lock_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_policy_fails_to_parse() {
        let err = LedgerConfig::from_toml_str(r#"negative_stock = "sometimes""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn environment_overrides_file_values() {
        let path = std::env::temp_dir().join(format!("stockledger-config-{}.toml", std::process::id()));
        std::fs::write(&path, "negative_stock = \"allow\"\nlock_timeout_ms = 40\n").unwrap();

        let config = LedgerConfig::load_with(
            Some(path.as_path()),
            env(&[
                (NEGATIVE_STOCK_ENV, "forbid"),
                (CONSUMPTION_ORDER_ENV, "LIFO"),
                (LOCK_TIMEOUT_ENV, "75"),
            ]),
        );
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();

        assert_eq!(config.negative_stock, NegativeStockPolicy::Forbid);
        assert_eq!(config.consumption_order, ConsumptionOrder::Lifo);
        assert_eq!(config.lock_timeout_ms, 75);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let config = LedgerConfig::load_with(
            None,
            env(&[
                (NEGATIVE_STOCK_ENV, "permit"),
                (CONSUMPTION_ORDER_ENV, "random"),
                (LOCK_TIMEOUT_ENV, "soon"),
            ]),
        )
        .unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn zero_lock_timeout_override_is_rejected() {
        let err = LedgerConfig::load_with(None, env(&[(LOCK_TIMEOUT_ENV, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn policy_names_match_the_toml_vocabulary() {
        assert_eq!(" Forbid ".parse::<NegativeStockPolicy>().unwrap(), NegativeStockPolicy::Forbid);
        for alias in ["permit", "deny", "true", "false"] {
            assert!(alias.parse::<NegativeStockPolicy>().is_err(), "{alias}");
            let toml = format!("negative_stock = \"{alias}\"");
            assert!(LedgerConfig::from_toml_str(&toml).is_err(), "{alias}");
        }
    }

    #[test]
    fn lock_timeout_builder_saturates_instead_of_truncating() {
        assert_eq!(LedgerConfig::default().with_lock_timeout(Duration::MAX).lock_timeout_ms, u64::MAX);
        assert_eq!(LedgerConfig::default().with_lock_timeout(Duration::ZERO).lock_timeout_ms, 1);
        assert_eq!(
            LedgerConfig::default().with_lock_timeout(Duration::from_millis(250)).lock_timeout_ms,
            250
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = LedgerConfig::load_with(Some(Path::new("/nonexistent/stockledger.toml")), |_| None).unwrap();
        assert_eq!(config.consumption_order, ConsumptionOrder::Fifo);
    }
}
