//! Read-through cache over a running [`StateStore`].
//!
//! A read is served from the snapshot when the store is loaded and the
//! requested block is either `Latest` or the snapshot's block. Reads scoped
//! to an address additionally require the address to be the one the store
//! tracks. Everything else, including all hint-search calls, goes to the
//! inner reader.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use trove_chain::{
    ApproxHint, BlockTag, ChainResult, CollateralDebt, FeeParams, FrontendRecord, ProtocolReader,
    RedemptionHintsData, StabilityDepositRecord, StakeRecord, TroveRecord,
};

use crate::store::{Snapshot, StateStore, StoreStrategy};
use crate::trove::Trove;

pub struct CachedReader<S: StoreStrategy> {
    inner: Arc<dyn ProtocolReader>,
    store: StateStore<S>,
}

impl<S: StoreStrategy> CachedReader<S> {
    pub fn new(inner: Arc<dyn ProtocolReader>, store: StateStore<S>) -> Self {
        Self { inner, store }
    }

    fn block_hit(&self, block: BlockTag) -> Option<Arc<Snapshot<S::Extra>>> {
        let snapshot = self.store.state()?;
        match block {
            BlockTag::Latest => Some(snapshot),
            BlockTag::Number(number) if number == snapshot.block_tag => Some(snapshot),
            BlockTag::Number(_) => None,
        }
    }

    fn user_hit(&self, owner: Address, block: BlockTag) -> Option<Arc<Snapshot<S::Extra>>> {
        if self.store.tracked_address() != Some(owner) {
            return None;
        }
        self.block_hit(block)
    }

    fn frontend_hit(&self, address: Address, block: BlockTag) -> Option<FrontendRecord> {
        let snapshot = self.block_hit(block)?;
        if self.store.frontend_tag() == Some(address) {
            Some(snapshot.base.frontend.to_record())
        } else if self.store.tracked_address() == Some(address) {
            Some(snapshot.base.own_frontend.to_record())
        } else {
            None
        }
    }
}

fn pair(trove: &Trove) -> CollateralDebt {
    CollateralDebt {
        collateral: trove.collateral.raw(),
        debt: trove.debt.raw(),
    }
}

#[async_trait]
impl<S: StoreStrategy> ProtocolReader for CachedReader<S> {
    async fn block_number(&self) -> ChainResult<u64> {
        self.inner.block_number().await
    }

    async fn block_timestamp(&self, block: BlockTag) -> ChainResult<u64> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.block_timestamp),
            None => self.inner.block_timestamp(block).await,
        }
    }

    async fn price(&self, block: BlockTag) -> ChainResult<U256> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.price.raw()),
            None => self.inner.price(block).await,
        }
    }

    async fn number_of_troves(&self, block: BlockTag) -> ChainResult<u64> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.number_of_troves),
            None => self.inner.number_of_troves(block).await,
        }
    }

    async fn total(&self, block: BlockTag) -> ChainResult<CollateralDebt> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(pair(&snapshot.base.total)),
            None => self.inner.total(block).await,
        }
    }

    async fn total_redistributed(&self, block: BlockTag) -> ChainResult<CollateralDebt> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(pair(&snapshot.base.total_redistributed)),
            None => self.inner.total_redistributed(block).await,
        }
    }

    async fn fee_params(&self, block: BlockTag) -> ChainResult<FeeParams> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.fee_params),
            None => self.inner.fee_params(block).await,
        }
    }

    async fn trove(&self, owner: Address, block: BlockTag) -> ChainResult<TroveRecord> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.trove_before_redistribution.to_record()),
            None => self.inner.trove(owner, block).await,
        }
    }

    async fn debt_token_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.debt_token_balance.raw()),
            None => self.inner.debt_token_balance(owner, block).await,
        }
    }

    async fn native_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.native_balance.raw()),
            None => self.inner.native_balance(owner, block).await,
        }
    }

    async fn collateral_surplus(&self, owner: Address, block: BlockTag) -> ChainResult<U256> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.collateral_surplus_balance.raw()),
            None => self.inner.collateral_surplus(owner, block).await,
        }
    }

    async fn last_trove(&self, block: BlockTag) -> ChainResult<Address> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.riskiest_trove_before_redistribution.user_trove.owner),
            None => self.inner.last_trove(block).await,
        }
    }

    async fn debt_in_stability_pool(&self, block: BlockTag) -> ChainResult<U256> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.debt_in_stability_pool.raw()),
            None => self.inner.debt_in_stability_pool(block).await,
        }
    }

    async fn stability_deposit(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ChainResult<StabilityDepositRecord> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.stability_deposit.to_record()),
            None => self.inner.stability_deposit(owner, block).await,
        }
    }

    async fn frontend(&self, address: Address, block: BlockTag) -> ChainResult<FrontendRecord> {
        match self.frontend_hit(address, block) {
            Some(record) => Ok(record),
            None => self.inner.frontend(address, block).await,
        }
    }

    async fn governance_token_balance(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ChainResult<U256> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.governance_token_balance.raw()),
            None => self.inner.governance_token_balance(owner, block).await,
        }
    }

    async fn total_staked(&self, block: BlockTag) -> ChainResult<U256> {
        match self.block_hit(block) {
            Some(snapshot) => Ok(snapshot.base.total_staked.raw()),
            None => self.inner.total_staked(block).await,
        }
    }

    async fn stake(&self, owner: Address, block: BlockTag) -> ChainResult<StakeRecord> {
        match self.user_hit(owner, block) {
            Some(snapshot) => Ok(snapshot.base.stake.to_record()),
            None => self.inner.stake(owner, block).await,
        }
    }

    async fn first_trove(&self) -> ChainResult<Address> {
        self.inner.first_trove().await
    }

    async fn prev_trove(&self, id: Address) -> ChainResult<Address> {
        self.inner.prev_trove(id).await
    }

    async fn next_trove(&self, id: Address) -> ChainResult<Address> {
        self.inner.next_trove(id).await
    }

    async fn approx_hint(&self, nicr: U256, trials: u64, seed: U256) -> ChainResult<ApproxHint> {
        self.inner.approx_hint(nicr, trials, seed).await
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        prev: Address,
        next: Address,
    ) -> ChainResult<(Address, Address)> {
        self.inner.find_insert_position(nicr, prev, next).await
    }

    async fn redemption_hints(
        &self,
        amount: U256,
        price: U256,
        max_iterations: u64,
    ) -> ChainResult<RedemptionHintsData> {
        self.inner.redemption_hints(amount, price, max_iterations).await
    }
}

impl<S: StoreStrategy> std::fmt::Debug for CachedReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedReader")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
