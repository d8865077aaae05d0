//! Client configuration with profile support.
//!
//! Every tunable of the hint search, gas estimation, fee slippage, state
//! store and transaction tracking lives here. The config is passed to the
//! components that need it; there is no global instance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::Decimal;

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub hints: HintsConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub fees: FeeSlippageConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub transactions: TransactionConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Approximate hint search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintsConfig {
    /// Total trials = ceil(trials_factor * sqrt(number of troves))
    #[serde(default = "default_trials_factor")]
    pub trials_factor: f64,

    /// Upper bound of trials per `getApproxHint` call (public RPC limits)
    #[serde(default = "default_max_trials_per_call")]
    pub max_trials_per_call: u64,

    /// Troves walked by `getRedemptionHints`
    #[serde(default = "default_redemption_max_iterations")]
    pub redemption_max_iterations: u64,
}

fn default_trials_factor() -> f64 {
    10.0
}
fn default_max_trials_per_call() -> u64 {
    2_500
}
fn default_redemption_max_iterations() -> u64 {
    crate::constants::REDEMPTION_MAX_ITERATIONS
}

impl Default for HintsConfig {
    fn default() -> Self {
        Self {
            trials_factor: default_trials_factor(),
            max_trials_per_call: default_max_trials_per_call(),
            redemption_max_iterations: default_redemption_max_iterations(),
        }
    }
}

/// Gas headroom terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasConfig {
    /// Covers a few extra hops of sorted list traversal
    #[serde(default = "default_list_traversal_gas")]
    pub list_traversal_gas: u64,

    /// Fixed part of updating the fee decay baseline
    #[serde(default = "default_base_rate_update_gas")]
    pub base_rate_update_gas: u64,

    /// Added per ceil(log2(tolerance minutes + 1))
    #[serde(default = "default_base_rate_update_gas_per_log2_minute")]
    pub base_rate_update_gas_per_log2_minute: u64,

    /// How long a fee-sensitive transaction may stay pending
    #[serde(default = "default_decay_tolerance_minutes")]
    pub decay_tolerance_minutes: u64,

    /// Headroom for reward issuance during liquidation
    #[serde(default = "default_issuance_gas")]
    pub issuance_gas: u64,
}

fn default_list_traversal_gas() -> u64 {
    80_000
}
fn default_base_rate_update_gas() -> u64 {
    10_000
}
fn default_base_rate_update_gas_per_log2_minute() -> u64 {
    1_414
}
fn default_decay_tolerance_minutes() -> u64 {
    10
}
fn default_issuance_gas() -> u64 {
    50_000
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            list_traversal_gas: default_list_traversal_gas(),
            base_rate_update_gas: default_base_rate_update_gas(),
            base_rate_update_gas_per_log2_minute: default_base_rate_update_gas_per_log2_minute(),
            decay_tolerance_minutes: default_decay_tolerance_minutes(),
            issuance_gas: default_issuance_gas(),
        }
    }
}

/// Slippage added to the current rate when the caller gives no maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSlippageConfig {
    #[serde(default = "default_borrowing_rate_slippage")]
    pub borrowing_rate_slippage: Decimal,

    #[serde(default = "default_redemption_rate_slippage")]
    pub redemption_rate_slippage: Decimal,
}

fn default_borrowing_rate_slippage() -> Decimal {
    Decimal::from_raw_u128(5_000_000_000_000_000) // 0.5%
}
fn default_redemption_rate_slippage() -> Decimal {
    Decimal::from_raw_u128(1_000_000_000_000_000) // 0.1%
}

impl Default for FeeSlippageConfig {
    fn default() -> Self {
        Self {
            borrowing_rate_slippage: default_borrowing_rate_slippage(),
            redemption_rate_slippage: default_redemption_rate_slippage(),
        }
    }
}

/// Which completed fetch the store keeps when fetches finish out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOrder {
    /// Whichever fetch completes last is applied
    #[default]
    LastCompleted,
    /// Completions older than the current snapshot are dropped
    MonotonicBlock,
}

/// State store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub apply_order: ApplyOrder,

    /// Poll interval when no WebSocket endpoint is configured (milliseconds)
    #[serde(default = "default_block_poll_interval")]
    pub block_poll_interval_ms: u64,

    /// Re-derive time-dependent state after this long without a block
    /// (milliseconds, 0 disables)
    #[serde(default = "default_self_update_interval")]
    pub self_update_interval_ms: u64,

    /// Coalesce blocks arriving within this window into one fetch of the
    /// highest (milliseconds, 0 fetches every block)
    #[serde(default)]
    pub block_debounce_ms: u64,
}

fn default_block_poll_interval() -> u64 {
    4_000
}
fn default_self_update_interval() -> u64 {
    30_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            apply_order: ApplyOrder::default(),
            block_poll_interval_ms: default_block_poll_interval(),
            self_update_interval_ms: default_self_update_interval(),
            block_debounce_ms: 0,
        }
    }
}

impl StoreConfig {
    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    pub fn self_update_interval(&self) -> Option<Duration> {
        (self.self_update_interval_ms > 0).then(|| Duration::from_millis(self.self_update_interval_ms))
    }

    pub fn block_debounce(&self) -> Option<Duration> {
        (self.block_debounce_ms > 0).then(|| Duration::from_millis(self.block_debounce_ms))
    }
}

/// Transaction tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Blocks (including the inclusion block) before a receipt is final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Receipt poll interval (milliseconds)
    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,
}

fn default_confirmations() -> u64 {
    1
}
fn default_receipt_poll_interval() -> u64 {
    1_000
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            receipt_poll_interval_ms: default_receipt_poll_interval(),
        }
    }
}

impl TransactionConfig {
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            hints: HintsConfig::default(),
            gas: GasConfig::default(),
            fees: FeeSlippageConfig::default(),
            store: StoreConfig::default(),
            transactions: TransactionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Local devnet: instant blocks, fast polling, single confirmation.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            hints: HintsConfig::default(),
            gas: GasConfig {
                decay_tolerance_minutes: 1,
                ..Default::default()
            },
            fees: FeeSlippageConfig::default(),
            store: StoreConfig {
                apply_order: ApplyOrder::LastCompleted,
                block_poll_interval_ms: 250,
                ..Default::default()
            },
            transactions: TransactionConfig {
                confirmations: 1,
                receipt_poll_interval_ms: 100,
            },
        }
    }

    /// Mainnet: longer pending tolerance, extra confirmation, no stale
    /// snapshots.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            hints: HintsConfig::default(),
            gas: GasConfig {
                decay_tolerance_minutes: 30,
                ..Default::default()
            },
            fees: FeeSlippageConfig::default(),
            store: StoreConfig {
                apply_order: ApplyOrder::MonotonicBlock,
                block_poll_interval_ms: 12_000,
                block_debounce_ms: 50,
                ..Default::default()
            },
            transactions: TransactionConfig {
                confirmations: 2,
                receipt_poll_interval_ms: 2_000,
            },
        }
    }

    /// Get profile from environment variable TROVE_PROFILE, or default.
    /// Supported values: testing, production, or a path to a TOML file
    pub fn from_env() -> Self {
        let profile = std::env::var("TROVE_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            path if path.ends_with(".toml") => Self::from_file(&profile).unwrap_or_else(|e| {
                tracing::warn!(path = %profile, error = %e, "Falling back to default config");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Client configuration loaded");
        tracing::info!(
            trials_factor = self.hints.trials_factor,
            max_trials_per_call = self.hints.max_trials_per_call,
            redemption_max_iterations = self.hints.redemption_max_iterations,
            "Hint search"
        );
        tracing::info!(
            traversal = self.gas.list_traversal_gas,
            tolerance_minutes = self.gas.decay_tolerance_minutes,
            issuance = self.gas.issuance_gas,
            "Gas headroom"
        );
        tracing::info!(
            apply_order = ?self.store.apply_order,
            poll_ms = self.store.block_poll_interval_ms,
            self_update_ms = self.store.self_update_interval_ms,
            debounce_ms = self.store.block_debounce_ms,
            confirmations = self.transactions.confirmations,
            "Store and transactions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.hints.max_trials_per_call, 2_500);
        assert_eq!(config.gas.list_traversal_gas, 80_000);
        assert_eq!(config.gas.decay_tolerance_minutes, 10);
        assert_eq!(config.store.apply_order, ApplyOrder::LastCompleted);
    }

    #[test]
    fn test_testing_profile() {
        let config = ClientConfig::testing();
        assert_eq!(config.profile, "testing");
        assert!(config.transactions.receipt_poll_interval() < Duration::from_secs(1));
    }

    #[test]
    fn test_production_profile() {
        let config = ClientConfig::production();
        assert_eq!(config.profile, "production");
        assert_eq!(config.store.apply_order, ApplyOrder::MonotonicBlock);
        assert_eq!(config.store.block_debounce(), Some(Duration::from_millis(50)));
        assert!(config.transactions.confirmations > 1);
    }

    #[test]
    fn test_store_timing_defaults() {
        let store = StoreConfig::default();
        assert_eq!(store.self_update_interval(), Some(Duration::from_secs(30)));
        assert_eq!(store.block_debounce(), None);

        let disabled = StoreConfig {
            self_update_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(disabled.self_update_interval(), None);
    }

    #[test]
    fn test_serialization() {
        let config = ClientConfig::production();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"production\""));
        assert!(toml_str.contains("apply_order = \"monotonic_block\""));

        let parsed: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [gas]
            decay_tolerance_minutes = 5

            [fees]
            borrowing_rate_slippage = "0.01"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.profile, "default");
        assert_eq!(parsed.gas.decay_tolerance_minutes, 5);
        assert_eq!(parsed.gas.issuance_gas, 50_000);
        assert_eq!(parsed.fees.borrowing_rate_slippage, "0.01".parse().unwrap());
    }
}
