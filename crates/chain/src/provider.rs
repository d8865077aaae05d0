//! Protocol reads over an HTTP provider.
//! Uses Alloy `#[sol(rpc)]` bindings for type-safe contract calls.

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::connection::{
    ApproxHint, BlockTag, CollateralDebt, FeeParams, FrontendRecord, ProtocolReader,
    RedemptionHintsData, StabilityDepositRecord, StakeRecord, TroveRecord,
};
use crate::contracts::{
    ICollSurplusPool, IDebtToken, IHintHelpers, ILQTYStaking, ILQTYToken, IPriceFeed,
    ISortedTroves, IStabilityPool, ITroveManager, ProtocolAddresses,
};
use crate::error::{ChainError, ChainResult};

/// Reads protocol state through an Alloy provider.
#[derive(Clone)]
pub struct AlloyReader {
    /// HTTP URL (kept for logging)
    rpc_url: String,
    provider: DynProvider,
    addresses: ProtocolAddresses,
}

impl AlloyReader {
    /// Connect to `rpc_url` and verify the endpoint answers.
    pub async fn connect(rpc_url: &str, addresses: ProtocolAddresses) -> ChainResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidUrl(format!("{rpc_url}: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url).erased();

        let block = provider.get_block_number().await?;
        info!(rpc = rpc_url, block = block, "Protocol reader connected");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            provider,
            addresses,
        })
    }

    /// Wrap an existing provider.
    pub fn with_provider(provider: DynProvider, addresses: ProtocolAddresses) -> Self {
        Self {
            rpc_url: String::new(),
            provider,
            addresses,
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    /// Chain ID reported by the endpoint.
    pub async fn chain_id(&self) -> ChainResult<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

#[async_trait]
impl ProtocolReader for AlloyReader {
    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self, block: BlockTag) -> ChainResult<u64> {
        let number = match block {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Number(n) => BlockNumberOrTag::Number(n),
        };
        let found = self
            .provider
            .get_block_by_number(number)
            .await?
            .ok_or_else(|| ChainError::BlockNotFound(block.number().unwrap_or_default()))?;
        Ok(found.header.timestamp)
    }

    async fn price(&self, block: BlockTag) -> ChainResult<U256> {
        let feed = IPriceFeed::new(self.addresses.price_feed, &self.provider);
        // fetchPrice is non-view but side-effect free under eth_call
        Ok(feed.fetchPrice().block(block.into()).call().await?._0)
    }

    async fn number_of_troves(&self, block: BlockTag) -> ChainResult<u64> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        let size = sorted.getSize().block(block.into()).call().await?._0;
        Ok(size.saturating_to::<u64>())
    }

    async fn total(&self, block: BlockTag) -> ChainResult<CollateralDebt> {
        let manager = ITroveManager::new(self.addresses.trove_manager, &self.provider);
        let id: BlockId = block.into();

        let coll_call = manager.getEntireSystemColl().block(id);
        let debt_call = manager.getEntireSystemDebt().block(id);
        let (coll, debt) = tokio::try_join!(coll_call.call(), debt_call.call())?;

        Ok(CollateralDebt {
            collateral: coll._0,
            debt: debt._0,
        })
    }

    async fn total_redistributed(&self, block: BlockTag) -> ChainResult<CollateralDebt> {
        let manager = ITroveManager::new(self.addresses.trove_manager, &self.provider);
        let id: BlockId = block.into();

        let coll_call = manager.L_ETH().block(id);
        let debt_call = manager.L_LUSDDebt().block(id);
        let (coll, debt) = tokio::try_join!(coll_call.call(), debt_call.call())?;

        Ok(CollateralDebt {
            collateral: coll._0,
            debt: debt._0,
        })
    }

    async fn fee_params(&self, block: BlockTag) -> ChainResult<FeeParams> {
        let manager = ITroveManager::new(self.addresses.trove_manager, &self.provider);
        let id: BlockId = block.into();

        let base_rate = manager.baseRate().block(id);
        let decay = manager.MINUTE_DECAY_FACTOR().block(id);
        let beta = manager.BETA().block(id);
        let last_op = manager.lastFeeOperationTime().block(id);

        let (base_rate, decay, beta, last_op) = tokio::try_join!(
            base_rate.call(),
            decay.call(),
            beta.call(),
            last_op.call()
        )?;

        Ok(FeeParams {
            base_rate: base_rate._0,
            minute_decay_factor: decay._0,
            beta: beta._0,
            last_fee_operation_time: last_op._0.saturating_to::<u64>(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn trove(&self, owner: Address, block: BlockTag) -> ChainResult<TroveRecord> {
        let manager = ITroveManager::new(self.addresses.trove_manager, &self.provider);
        let id: BlockId = block.into();

        let trove_call = manager.Troves(owner).block(id);
        let snapshot_call = manager.rewardSnapshots(owner).block(id);
        let (trove, snapshot) = tokio::try_join!(trove_call.call(), snapshot_call.call())?;

        Ok(TroveRecord {
            status: trove.status,
            collateral: trove.coll,
            debt: trove.debt,
            stake: trove.stake,
            snapshot_collateral: snapshot.ETH,
            snapshot_debt: snapshot.LUSDDebt,
        })
    }

    async fn debt_token_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        let token = IDebtToken::new(self.addresses.debt_token, &self.provider);
        Ok(token.balanceOf(owner).block(block.into()).call().await?._0)
    }

    async fn native_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        Ok(self
            .provider
            .get_balance(owner)
            .block_id(block.into())
            .await?)
    }

    async fn collateral_surplus(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        let pool = ICollSurplusPool::new(self.addresses.coll_surplus_pool, &self.provider);
        Ok(pool.getCollateral(owner).block(block.into()).call().await?._0)
    }

    async fn last_trove(&self, block: BlockTag) -> ChainResult<Address> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        Ok(sorted.getLast().block(block.into()).call().await?._0)
    }

    async fn debt_in_stability_pool(&self, block: BlockTag) -> ChainResult<U256> {
        let pool = IStabilityPool::new(self.addresses.stability_pool, &self.provider);
        Ok(pool.getTotalLUSDDeposits().block(block.into()).call().await?._0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stability_deposit(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ChainResult<StabilityDepositRecord> {
        let pool = IStabilityPool::new(self.addresses.stability_pool, &self.provider);
        let id: BlockId = block.into();

        let deposit_call = pool.deposits(owner).block(id);
        let compounded_call = pool.getCompoundedLUSDDeposit(owner).block(id);
        let collateral_call = pool.getDepositorETHGain(owner).block(id);
        let reward_call = pool.getDepositorLQTYGain(owner).block(id);

        let (deposit, compounded, collateral_gain, reward) = tokio::try_join!(
            deposit_call.call(),
            compounded_call.call(),
            collateral_call.call(),
            reward_call.call()
        )?;

        Ok(StabilityDepositRecord {
            initial_value: deposit.initialValue,
            compounded_deposit: compounded._0,
            collateral_gain: collateral_gain._0,
            governance_token_gain: reward._0,
            frontend_tag: deposit.frontEndTag,
        })
    }

    async fn frontend(&self, address: Address, block: BlockTag) -> ChainResult<FrontendRecord> {
        let pool = IStabilityPool::new(self.addresses.stability_pool, &self.provider);
        let frontend = pool.frontEnds(address).block(block.into()).call().await?;
        Ok(FrontendRecord {
            registered: frontend.registered,
            kickback_rate: frontend.kickbackRate,
        })
    }

    async fn governance_token_balance(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ChainResult<U256> {
        let token = ILQTYToken::new(self.addresses.governance_token, &self.provider);
        Ok(token.balanceOf(owner).block(block.into()).call().await?._0)
    }

    async fn total_staked(&self, block: BlockTag) -> ChainResult<U256> {
        let staking = ILQTYStaking::new(self.addresses.staking, &self.provider);
        Ok(staking.totalLQTYStaked().block(block.into()).call().await?._0)
    }

    async fn stake(&self, owner: Address, block: BlockTag) -> ChainResult<StakeRecord> {
        let staking = ILQTYStaking::new(self.addresses.staking, &self.provider);
        let id: BlockId = block.into();

        let staked_call = staking.stakes(owner).block(id);
        let collateral_call = staking.getPendingETHGain(owner).block(id);
        let debt_call = staking.getPendingLUSDGain(owner).block(id);
        let (staked, collateral_gain, debt_gain) = tokio::try_join!(
            staked_call.call(),
            collateral_call.call(),
            debt_call.call()
        )?;

        Ok(StakeRecord {
            staked: staked._0,
            collateral_gain: collateral_gain._0,
            debt_token_gain: debt_gain._0,
        })
    }

    async fn first_trove(&self) -> ChainResult<Address> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        Ok(sorted.getFirst().call().await?._0)
    }

    async fn prev_trove(&self, id: Address) -> ChainResult<Address> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        Ok(sorted.getPrev(id).call().await?._0)
    }

    async fn next_trove(&self, id: Address) -> ChainResult<Address> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        Ok(sorted.getNext(id).call().await?._0)
    }

    async fn approx_hint(&self, nicr: U256, trials: u64, seed: U256) -> ChainResult<ApproxHint> {
        let helpers = IHintHelpers::new(self.addresses.hint_helpers, &self.provider);
        let result = helpers
            .getApproxHint(nicr, U256::from(trials), seed)
            .call()
            .await?;

        debug!(
            trials = trials,
            hint = %result.hintAddress,
            diff = %result.diff,
            "Approximate hint batch"
        );

        Ok(ApproxHint {
            hint: result.hintAddress,
            diff: result.diff,
            latest_random_seed: result.latestRandomSeed,
        })
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        prev: Address,
        next: Address,
    ) -> ChainResult<(Address, Address)> {
        let sorted = ISortedTroves::new(self.addresses.sorted_troves, &self.provider);
        let position = sorted.findInsertPosition(nicr, prev, next).call().await?;
        Ok((position._0, position._1))
    }

    async fn redemption_hints(
        &self,
        amount: U256,
        price: U256,
        max_iterations: u64,
    ) -> ChainResult<RedemptionHintsData> {
        let helpers = IHintHelpers::new(self.addresses.hint_helpers, &self.provider);
        let result = helpers
            .getRedemptionHints(amount, price, U256::from(max_iterations))
            .call()
            .await?;

        Ok(RedemptionHintsData {
            first_hint: result.firstRedemptionHint,
            partial_nicr: result.partialRedemptionHintNICR,
            truncated_amount: result.truncatedLUSDamount,
        })
    }
}

impl std::fmt::Debug for AlloyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyReader")
            .field("rpc_url", &self.rpc_url)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}
