//! Domain-typed reads over a [`ProtocolReader`].

use std::sync::Arc;

use alloy::primitives::Address;
use trove_chain::{BlockTag, CollateralDebt, FeeParams, ProtocolReader};

use crate::decimal::Decimal;
use crate::error::ClientResult;
use crate::fees::Fees;
use crate::stability::{FrontendStatus, Stake, StabilityDeposit};
use crate::trove::{Trove, TroveWithPendingRedistribution, UserTrove};

#[derive(Clone)]
pub struct ReadableTroves {
    reader: Arc<dyn ProtocolReader>,
}

fn trove_from(pair: CollateralDebt) -> Trove {
    Trove::new(Decimal::from_raw(pair.collateral), Decimal::from_raw(pair.debt))
}

impl ReadableTroves {
    pub fn new(reader: Arc<dyn ProtocolReader>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &Arc<dyn ProtocolReader> {
        &self.reader
    }

    pub async fn block_number(&self) -> ClientResult<u64> {
        Ok(self.reader.block_number().await?)
    }

    /// Unix seconds.
    pub async fn block_timestamp(&self, block: BlockTag) -> ClientResult<u64> {
        Ok(self.reader.block_timestamp(block).await?)
    }

    pub async fn fee_params(&self, block: BlockTag) -> ClientResult<FeeParams> {
        Ok(self.reader.fee_params(block).await?)
    }

    pub async fn price(&self, block: BlockTag) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.price(block).await?))
    }

    pub async fn number_of_troves(&self, block: BlockTag) -> ClientResult<u64> {
        Ok(self.reader.number_of_troves(block).await?)
    }

    /// System-wide collateral and debt.
    pub async fn total(&self, block: BlockTag) -> ClientResult<Trove> {
        Ok(trove_from(self.reader.total(block).await?))
    }

    /// Accumulated redistribution per unit of stake.
    pub async fn total_redistributed(&self, block: BlockTag) -> ClientResult<Trove> {
        Ok(trove_from(self.reader.total_redistributed(block).await?))
    }

    pub async fn trove_before_redistribution(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ClientResult<TroveWithPendingRedistribution> {
        let record = self.reader.trove(owner, block).await?;
        Ok(TroveWithPendingRedistribution::from_record(owner, &record))
    }

    /// Trove with its pending redistribution applied.
    pub async fn trove(&self, owner: Address, block: BlockTag) -> ClientResult<UserTrove> {
        let (trove, total_redistributed) = tokio::try_join!(
            self.trove_before_redistribution(owner, block),
            self.total_redistributed(block)
        )?;
        Ok(trove.apply_redistribution(&total_redistributed))
    }

    /// Fee calculator at `block`, with recovery mode resolved from the
    /// system's collateral ratio.
    pub async fn fees(&self, block: BlockTag) -> ClientResult<Fees> {
        let (params, timestamp, total, price) = tokio::try_join!(
            self.fee_params(block),
            self.block_timestamp(block),
            self.total(block),
            self.price(block)
        )?;
        let recovery_mode = total.collateral_ratio_is_below_critical(price);
        Ok(Fees::from_params(&params, timestamp, recovery_mode))
    }

    pub async fn debt_token_balance(&self, owner: Address, block: BlockTag) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.debt_token_balance(owner, block).await?))
    }

    pub async fn native_balance(&self, owner: Address, block: BlockTag) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.native_balance(owner, block).await?))
    }

    /// Collateral left over from a liquidation or redemption, claimable by
    /// the owner.
    pub async fn collateral_surplus_balance(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.collateral_surplus(owner, block).await?))
    }

    /// The riskiest trove (lowest nominal ratio) as stored on chain, or an
    /// empty one when the list is empty.
    pub async fn riskiest_trove_before_redistribution(
        &self,
        block: BlockTag,
    ) -> ClientResult<TroveWithPendingRedistribution> {
        let last = self.reader.last_trove(block).await?;
        if last == Address::ZERO {
            return Ok(TroveWithPendingRedistribution::default());
        }
        self.trove_before_redistribution(last, block).await
    }

    /// Debt tokens held by the stability pool.
    pub async fn debt_in_stability_pool(&self, block: BlockTag) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.debt_in_stability_pool(block).await?))
    }

    pub async fn stability_deposit(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ClientResult<StabilityDeposit> {
        let record = self.reader.stability_deposit(owner, block).await?;
        Ok(StabilityDeposit::from_record(&record))
    }

    pub async fn frontend_status(
        &self,
        address: Address,
        block: BlockTag,
    ) -> ClientResult<FrontendStatus> {
        Ok(FrontendStatus::from_record(&self.reader.frontend(address, block).await?))
    }

    pub async fn governance_token_balance(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(
            self.reader.governance_token_balance(owner, block).await?,
        ))
    }

    pub async fn total_staked(&self, block: BlockTag) -> ClientResult<Decimal> {
        Ok(Decimal::from_raw(self.reader.total_staked(block).await?))
    }

    pub async fn stake(&self, owner: Address, block: BlockTag) -> ClientResult<Stake> {
        Ok(Stake::from_record(&self.reader.stake(owner, block).await?))
    }
}

impl std::fmt::Debug for ReadableTroves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableTroves").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{address, d, MockChain};
    use crate::trove::TroveStatus;

    #[tokio::test]
    async fn test_trove_applies_redistribution() {
        let chain = Arc::new(MockChain::new());
        let owner = address(1);
        chain.set_trove(owner, d("10"), d("2000"));
        // 0.1 collateral and 5 debt per unit of stake (stake = 10)
        chain.state.write().total_redistributed = (d("0.1"), d("5"));

        let readable = ReadableTroves::new(chain.clone());
        let pending = readable
            .trove_before_redistribution(owner, BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(pending.user_trove.trove, Trove::new(d("10"), d("2000")));

        let trove = readable.trove(owner, BlockTag::Latest).await.unwrap();
        assert_eq!(trove.status, TroveStatus::Open);
        assert_eq!(trove.trove, Trove::new(d("11"), d("2050")));
    }

    #[tokio::test]
    async fn test_missing_trove_is_empty() {
        let chain = Arc::new(MockChain::new());
        let readable = ReadableTroves::new(chain.clone());

        let trove = readable.trove(address(9), BlockTag::Latest).await.unwrap();
        assert_eq!(trove.status, TroveStatus::NonExistent);
        assert!(trove.trove.is_empty());
    }

    #[tokio::test]
    async fn test_fees_resolve_recovery_mode() {
        let chain = Arc::new(MockChain::new());
        let readable = ReadableTroves::new(chain.clone());

        // 1000 collateral at 200 against 100000 debt: TCR 2.0
        let fees = readable.fees(BlockTag::Latest).await.unwrap();
        assert!(!fees.recovery_mode());

        chain.state.write().price = d("100");
        let fees = readable.fees(BlockTag::Latest).await.unwrap();
        assert!(fees.recovery_mode());
        assert_eq!(fees.borrowing_rate(None), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_riskiest_trove_is_list_tail() {
        let chain = Arc::new(MockChain::with_sorted_troves(3));
        let readable = ReadableTroves::new(chain.clone());

        let (tail, _) = *chain.sorted().last().unwrap();
        let riskiest = readable
            .riskiest_trove_before_redistribution(BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(riskiest.user_trove.owner, tail);

        let empty = Arc::new(MockChain::new());
        let riskiest = ReadableTroves::new(empty)
            .riskiest_trove_before_redistribution(BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(riskiest.user_trove.status, TroveStatus::NonExistent);
    }

    #[tokio::test]
    async fn test_stability_and_staking_reads() {
        let chain = Arc::new(MockChain::new());
        let owner = address(1);
        chain.set_stability_deposit(owner, d("1000"), d("900"), d("0.5"));
        chain.set_stake(owner, d("40"), d("0.1"), d("12"));
        let readable = ReadableTroves::new(chain.clone());

        let deposit = readable.stability_deposit(owner, BlockTag::Latest).await.unwrap();
        assert_eq!(deposit.initial, d("1000"));
        assert_eq!(deposit.current, d("900"));
        assert_eq!(deposit.collateral_gain, d("0.5"));

        let stake = readable.stake(owner, BlockTag::Latest).await.unwrap();
        assert_eq!(stake.staked, d("40"));
        assert_eq!(stake.debt_token_gain, d("12"));

        assert!(readable.stake(address(2), BlockTag::Latest).await.unwrap().is_empty());
        assert!(!readable
            .frontend_status(address(2), BlockTag::Latest)
            .await
            .unwrap()
            .is_registered());
    }

    #[tokio::test]
    async fn test_read_errors_are_network_errors() {
        let chain = Arc::new(MockChain::new());
        chain.set_fail_reads(true);
        let readable = ReadableTroves::new(chain.clone());

        assert!(readable.price(BlockTag::Latest).await.unwrap_err().is_network());
    }
}
