use serde::Deserialize;

use crate::environment::Environment;
use crate::error::FeedError;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - The brokerage environment (production / paper)
// - The broker account pool
// - Feed tuning parameters (capacity, throttling, timeouts)
// - The symbol catalog used at startup
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Target brokerage environment, chosen once per process
    pub environment: Environment,

    /// Broker accounts used for realtime feed sessions
    pub accounts: Vec<Account>,

    /// Feed tuning parameters (all optional, sane defaults)
    #[serde(default)]
    pub feed: FeedTuning,

    /// Symbol catalog configuration
    pub catalog: CatalogConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Validates config semantics after deserialization.
    ///
    /// CHECKS:
    /// - At least one account must be configured
    /// - Account names must be unique (they key the routing table)
    /// - Capacity must be non-zero
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.accounts.is_empty() {
            return Err(FeedError::Config("at least one account is required".into()));
        }

        for (i, account) in self.accounts.iter().enumerate() {
            if self.accounts[..i].iter().any(|a| a.name == account.name) {
                return Err(FeedError::Config(format!(
                    "duplicate account name '{}'",
                    account.name
                )));
            }
        }

        if self.feed.capacity_per_account == 0 {
            return Err(FeedError::Config("capacity_per_account must be > 0".into()));
        }

        Ok(())
    }
}

// ------------------------------------------------------------
// Broker account
// ------------------------------------------------------------
//
// One entry per brokerage app registration.
//
// Notes:
// - The key/secret pair is security-sensitive and must never
//   be committed to version control.
// - Each account carries its own provider-imposed subscription
//   quota, which is why several accounts are pooled.
// - Immutable after configuration load.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Account {
    /// Stable account identifier used in logs and routing
    pub name: String,

    /// Brokerage application key
    pub app_key: String,

    /// Brokerage application secret
    pub app_secret: String,
}

// ------------------------------------------------------------
// Feed tuning
// ------------------------------------------------------------
//
// Controls capacity and send throttling per feed session.
//
// The batch size and inter-frame delay exist because the
// provider enforces an undocumented rate limit on subscribe
// frames. Both are configurable rather than hardcoded.
//
#[derive(Debug, Deserialize, Clone)]
pub struct FeedTuning {
    /// Maximum symbols a single account session may hold
    #[serde(default = "default_capacity")]
    pub capacity_per_account: usize,

    /// Number of subscribe frames grouped per log line
    #[serde(default = "default_batch_size")]
    pub subscribe_batch_size: usize,

    /// Delay between individual subscribe frame sends
    #[serde(default = "default_delay_ms")]
    pub subscribe_delay_ms: u64,

    /// Upper bound on the WebSocket handshake wait
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_capacity() -> usize {
    20
}

fn default_batch_size() -> usize {
    20
}

fn default_delay_ms() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for FeedTuning {
    fn default() -> Self {
        Self {
            capacity_per_account: default_capacity(),
            subscribe_batch_size: default_batch_size(),
            subscribe_delay_ms: default_delay_ms(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// ------------------------------------------------------------
// Symbol catalog configuration
// ------------------------------------------------------------
//
// The instrument universe subscribed at startup.
//
// In the full deployment this list comes from an external
// catalog service; the config-backed variant here keeps the
// collector self-contained.
//
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Instrument codes to subscribe at startup
    /// Example: ["005930", "000660"]
    pub symbols: Vec<String>,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
//
// Optional debug flags used during development and testing.
//
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables raw inbound frame logging
    pub log_frames: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(accounts: &str) -> String {
        format!(
            r#"{{
                "environment": "paper",
                "accounts": {accounts},
                "catalog": {{"symbols": ["005930"]}}
            }}"#
        )
    }

    #[test]
    fn feed_tuning_defaults_apply_when_section_absent() {
        let cfg: Config = serde_json::from_str(&sample(
            r#"[{"name": "a", "app_key": "k", "app_secret": "s"}]"#,
        ))
        .unwrap();

        assert_eq!(cfg.feed.capacity_per_account, 20);
        assert_eq!(cfg.feed.subscribe_batch_size, 20);
        assert_eq!(cfg.feed.subscribe_delay_ms, 30);
        assert_eq!(cfg.feed.connect_timeout_secs, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_empty_account_pool() {
        let cfg: Config = serde_json::from_str(&sample("[]")).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_account_names() {
        let cfg: Config = serde_json::from_str(&sample(
            r#"[
                {"name": "a", "app_key": "k1", "app_secret": "s1"},
                {"name": "a", "app_key": "k2", "app_secret": "s2"}
            ]"#,
        ))
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_feed_section_keeps_remaining_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "environment": "production",
                "accounts": [{"name": "a", "app_key": "k", "app_secret": "s"}],
                "feed": {"subscribe_delay_ms": 50},
                "catalog": {"symbols": []}
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.feed.subscribe_delay_ms, 50);
        assert_eq!(cfg.feed.capacity_per_account, 20);
    }
}
