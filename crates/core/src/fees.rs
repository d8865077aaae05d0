//! Borrowing and redemption fee prediction.
//!
//! Mirrors the on-chain base rate decay so the client can tell what a fee
//! will be at some later time (e.g. while a transaction sits in the mempool).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use trove_chain::FeeParams;

use crate::constants::{MAXIMUM_BORROWING_RATE, MINIMUM_BORROWING_RATE, MINIMUM_REDEMPTION_RATE};
use crate::decimal::Decimal;

/// Fee calculator for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    base_rate_without_decay: Decimal,
    minute_decay_factor: Decimal,
    beta: Decimal,
    last_fee_operation: DateTime<Utc>,
    time_of_latest_block: DateTime<Utc>,
    recovery_mode: bool,
}

impl Fees {
    pub fn new(
        base_rate_without_decay: Decimal,
        minute_decay_factor: Decimal,
        beta: Decimal,
        last_fee_operation: DateTime<Utc>,
        time_of_latest_block: DateTime<Utc>,
        recovery_mode: bool,
    ) -> Self {
        Self {
            base_rate_without_decay,
            minute_decay_factor,
            beta,
            last_fee_operation,
            time_of_latest_block,
            recovery_mode,
        }
    }

    /// Build from raw contract values and the block's timestamp (Unix seconds).
    pub fn from_params(params: &FeeParams, block_timestamp: u64, recovery_mode: bool) -> Self {
        Self::new(
            Decimal::from_raw(params.base_rate),
            Decimal::from_raw(params.minute_decay_factor),
            Decimal::from_raw(params.beta),
            unix_to_datetime(params.last_fee_operation_time),
            unix_to_datetime(block_timestamp),
            recovery_mode,
        )
    }

    pub fn with_recovery_mode(mut self, recovery_mode: bool) -> Self {
        self.recovery_mode = recovery_mode;
        self
    }

    pub fn time_of_latest_block(&self) -> DateTime<Utc> {
        self.time_of_latest_block
    }

    pub fn recovery_mode(&self) -> bool {
        self.recovery_mode
    }

    /// Decayed base rate at `when` (default: the latest block).
    pub fn base_rate(&self, when: Option<DateTime<Utc>>) -> Decimal {
        let when = when.unwrap_or(self.time_of_latest_block);
        // Clamped: a clock behind the chain overestimates the fee, which is safe
        let elapsed = (when - self.last_fee_operation).max(Duration::zero());
        let minutes = elapsed.num_minutes().max(0) as u64;

        self.minute_decay_factor
            .pow(minutes)
            .mul(self.base_rate_without_decay)
    }

    pub fn borrowing_rate(&self, when: Option<DateTime<Utc>>) -> Decimal {
        if self.recovery_mode {
            return Decimal::ZERO;
        }
        (MINIMUM_BORROWING_RATE + self.base_rate(when)).min(MAXIMUM_BORROWING_RATE)
    }

    /// Rate charged for redeeming `redeemed_fraction_of_supply` of the debt token.
    pub fn redemption_rate(
        &self,
        redeemed_fraction_of_supply: Decimal,
        when: Option<DateTime<Utc>>,
    ) -> Decimal {
        let mut base_rate = self.base_rate(when);
        if !redeemed_fraction_of_supply.is_zero() {
            base_rate = redeemed_fraction_of_supply.div(self.beta) + base_rate;
        }
        (MINIMUM_REDEMPTION_RATE + base_rate).min(Decimal::ONE)
    }
}

/// Seconds since epoch to UTC; out-of-range values clamp to the epoch.
pub fn unix_to_datetime(seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
