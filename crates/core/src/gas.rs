//! Gas limits with headroom for state drift.
//!
//! An estimate is only valid for the state it was taken against. Between
//! submission and inclusion other transactions can move the trove's slot in
//! the sorted list and the borrowing rate keeps decaying, so trove
//! operations estimate twice (now, and with the fee decayed to the end of
//! the tolerance window) and add fixed headroom on top of the larger one.

use std::sync::Arc;

use alloy::rpc::types::TransactionRequest;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use trove_chain::TransactionSubmitter;

use crate::config::GasConfig;
use crate::constants::MINIMUM_DEBT;
use crate::decimal::Decimal;
use crate::error::{ClientResult, UserInputError};
use crate::fees::Fees;
use crate::trove::Trove;

/// Result of an estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    /// Estimate against the current state
    pub now: u64,
    /// Estimate with the borrowing fee decayed, when one was taken
    pub later: Option<u64>,
    pub gas_limit: u64,
    /// `gas_limit - now`
    pub gas_headroom: u64,
}

pub struct GasEstimator {
    submitter: Arc<dyn TransactionSubmitter>,
    config: GasConfig,
}

impl GasEstimator {
    pub fn new(submitter: Arc<dyn TransactionSubmitter>, config: GasConfig) -> Self {
        Self { submitter, config }
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    /// Gas for moving the fee decay baseline after `tolerance` minutes of
    /// waiting: a fixed part plus a term per halving step of the decay
    /// exponentiation.
    pub fn base_rate_update_gas(&self) -> u64 {
        let minutes = self.config.decay_tolerance_minutes;
        self.config.base_rate_update_gas
            + self.config.base_rate_update_gas_per_log2_minute
                * u64::from(ceil_log2(minutes.saturating_add(1)))
    }

    /// End of the pending-tolerance window.
    pub fn decay_horizon(&self, fees: &Fees) -> DateTime<Utc> {
        let minutes = i64::try_from(self.config.decay_tolerance_minutes).unwrap_or(i64::MAX / 60);
        fees.time_of_latest_block() + Duration::minutes(minutes)
    }

    /// Borrowing rate at the end of the tolerance window.
    pub fn decayed_borrowing_rate(&self, fees: &Fees) -> Decimal {
        fees.borrowing_rate(Some(self.decay_horizon(fees)))
    }

    /// Rejects a trove whose debt would end up below the minimum if the
    /// transaction only gets mined after the fee has decayed.
    pub fn ensure_decayed_debt_above_minimum(&self, decayed: &Trove) -> Result<(), UserInputError> {
        if decayed.debt < MINIMUM_DEBT {
            return Err(UserInputError::DebtBelowMinimum {
                debt: decayed.debt,
                minimum: MINIMUM_DEBT,
                tolerance_minutes: self.config.decay_tolerance_minutes,
            });
        }
        Ok(())
    }

    /// Estimate a sorted-list operation.
    ///
    /// `later` is the same operation with amounts simulating fee decay. The
    /// limit is `max(now, later) + traversal`, plus the base rate update
    /// term when the operation moves the base rate.
    pub async fn estimate_trove_operation(
        &self,
        now: &TransactionRequest,
        later: Option<&TransactionRequest>,
        moves_base_rate: bool,
    ) -> ClientResult<GasEstimate> {
        let (gas_now, gas_later) = match later {
            Some(later) => {
                let (gas_now, gas_later) = tokio::try_join!(
                    self.submitter.estimate_gas(now),
                    self.submitter.estimate_gas(later)
                )?;
                (gas_now, Some(gas_later))
            }
            None => (self.submitter.estimate_gas(now).await?, None),
        };

        let mut gas_limit = gas_now.max(gas_later.unwrap_or(0)) + self.config.list_traversal_gas;
        if moves_base_rate {
            gas_limit += self.base_rate_update_gas();
        }

        let estimate = GasEstimate {
            now: gas_now,
            later: gas_later,
            gas_limit,
            gas_headroom: gas_limit - gas_now,
        };
        debug!(
            now = estimate.now,
            later = ?estimate.later,
            limit = estimate.gas_limit,
            "Estimated trove operation"
        );
        Ok(estimate)
    }

    /// Estimate once and add a fixed amount.
    pub async fn estimate_with_headroom(
        &self,
        tx: &TransactionRequest,
        headroom: u64,
    ) -> ClientResult<GasEstimate> {
        let gas_now = self.submitter.estimate_gas(tx).await?;
        Ok(GasEstimate {
            now: gas_now,
            later: None,
            gas_limit: gas_now + headroom,
            gas_headroom: headroom,
        })
    }

    /// Liquidations may trigger reward issuance.
    pub async fn estimate_liquidation(&self, tx: &TransactionRequest) -> ClientResult<GasEstimate> {
        self.estimate_with_headroom(tx, self.config.issuance_gas).await
    }

    /// Redemptions move the base rate.
    pub async fn estimate_redemption(&self, tx: &TransactionRequest) -> ClientResult<GasEstimate> {
        self.estimate_with_headroom(tx, self.base_rate_update_gas())
            .await
    }
}

impl std::fmt::Debug for GasEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasEstimator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ceil_log2(x: u64) -> u32 {
    if x <= 1 {
        0
    } else {
        u64::BITS - (x - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::unix_to_datetime;
    use crate::mock::{d, MockChain};
    use alloy::primitives::Bytes;

    fn tx(tag: u8) -> TransactionRequest {
        TransactionRequest::default().input(Bytes::from(vec![tag]).into())
    }

    fn estimator(chain: &Arc<MockChain>, config: GasConfig) -> GasEstimator {
        GasEstimator::new(chain.clone(), config)
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(11), 4);
    }

    #[test]
    fn test_base_rate_update_gas() {
        let chain = Arc::new(MockChain::new());
        // 10 minutes: ceil(log2(11)) = 4
        let estimator = estimator(&chain, GasConfig::default());
        assert_eq!(estimator.base_rate_update_gas(), 10_000 + 4 * 1_414);

        let zero = estimator_with_tolerance(&chain, 0);
        assert_eq!(zero.base_rate_update_gas(), 10_000);
    }

    fn estimator_with_tolerance(chain: &Arc<MockChain>, minutes: u64) -> GasEstimator {
        estimator(
            chain,
            GasConfig {
                decay_tolerance_minutes: minutes,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_limit_covers_both_estimates() {
        let chain = Arc::new(MockChain::new());
        let estimator = estimator(&chain, GasConfig::default());

        let values = [50_000u64, 200_000, 350_000];
        for now in values {
            for later in values {
                chain.set_gas_fn(move |tx| {
                    match tx.input.input().map(|b| b[0]) {
                        Some(0) => now,
                        _ => later,
                    }
                });

                let estimate = estimator
                    .estimate_trove_operation(&tx(0), Some(&tx(1)), false)
                    .await
                    .unwrap();
                assert!(estimate.gas_limit >= now + 80_000);
                assert!(estimate.gas_limit >= later + 80_000);
                assert_eq!(estimate.gas_headroom, estimate.gas_limit - now);
                assert_eq!(estimate.later, Some(later));
            }
        }
    }

    #[tokio::test]
    async fn test_base_rate_term_added() {
        let chain = Arc::new(MockChain::new());
        let estimator = estimator(&chain, GasConfig::default());

        let plain = estimator
            .estimate_trove_operation(&tx(0), None, false)
            .await
            .unwrap();
        let moving = estimator
            .estimate_trove_operation(&tx(0), None, true)
            .await
            .unwrap();
        assert_eq!(plain.gas_limit, 300_000 + 80_000);
        assert_eq!(
            moving.gas_limit,
            plain.gas_limit + estimator.base_rate_update_gas()
        );
        assert_eq!(chain.calls("estimate_gas"), 2);
    }

    #[tokio::test]
    async fn test_fixed_headroom() {
        let chain = Arc::new(MockChain::new());
        let estimator = estimator(&chain, GasConfig::default());

        let liquidation = estimator.estimate_liquidation(&tx(0)).await.unwrap();
        assert_eq!(liquidation.gas_limit, 350_000);
        assert_eq!(liquidation.gas_headroom, 50_000);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let chain = Arc::new(MockChain::new());
        chain.set_fail_reads(true);
        let estimator = estimator(&chain, GasConfig::default());

        let err = estimator
            .estimate_trove_operation(&tx(0), Some(&tx(1)), true)
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_decayed_rate_and_minimum() {
        let chain = Arc::new(MockChain::new());
        let estimator = estimator(&chain, GasConfig::default());

        let t0 = unix_to_datetime(1_700_000_000);
        let fees = Fees::new(d("0.04"), d("0.5"), d("2"), t0, t0, false);
        // 10 minutes at 0.5 per minute leaves ~0.00004 of base rate
        let decayed = estimator.decayed_borrowing_rate(&fees);
        assert!(decayed < fees.borrowing_rate(None));
        assert!(decayed >= d("0.005"));

        assert!(estimator
            .ensure_decayed_debt_above_minimum(&Trove::new(d("10"), d("2000")))
            .is_ok());
        assert!(matches!(
            estimator.ensure_decayed_debt_above_minimum(&Trove::new(d("10"), d("1999"))),
            Err(UserInputError::DebtBelowMinimum { tolerance_minutes: 10, .. })
        ));
    }
}
