//! Store strategy that re-reads everything at each block.

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::instrument;
use trove_chain::BlockTag;

use super::{BaseState, StoreStrategy, StoreUpdate};
use crate::decimal::Decimal;
use crate::error::ClientResult;
use crate::readable::ReadableTroves;
use crate::stability::{FrontendStatus, Stake, StabilityDeposit};
use crate::trove::TroveWithPendingRedistribution;

/// Strategy-specific part of a block-polled snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPolledExtra {
    /// Fetches applied since the store started
    pub applied_updates: u64,
}

/// Fans out one read per state field, all pinned to the same block.
#[derive(Debug, Clone)]
pub struct BlockPolledStrategy {
    readable: ReadableTroves,
    tracked: Option<Address>,
    frontend_tag: Option<Address>,
}

struct UserState {
    trove_before_redistribution: TroveWithPendingRedistribution,
    debt_token_balance: Decimal,
    native_balance: Decimal,
    collateral_surplus_balance: Decimal,
    governance_token_balance: Decimal,
    stability_deposit: StabilityDeposit,
    stake: Stake,
    own_frontend: FrontendStatus,
}

impl BlockPolledStrategy {
    pub fn new(readable: ReadableTroves, tracked: Option<Address>) -> Self {
        Self {
            readable,
            tracked,
            frontend_tag: None,
        }
    }

    /// Also mirror the registration of the frontend deposits are tagged
    /// with.
    pub fn with_frontend_tag(mut self, frontend_tag: Address) -> Self {
        self.frontend_tag = (frontend_tag != Address::ZERO).then_some(frontend_tag);
        self
    }

    async fn fetch_user(&self, owner: Address, tag: BlockTag) -> ClientResult<UserState> {
        let readable = &self.readable;
        let (
            trove_before_redistribution,
            debt_token_balance,
            native_balance,
            collateral_surplus_balance,
            governance_token_balance,
            stability_deposit,
            stake,
            own_frontend,
        ) = tokio::try_join!(
            readable.trove_before_redistribution(owner, tag),
            readable.debt_token_balance(owner, tag),
            readable.native_balance(owner, tag),
            readable.collateral_surplus_balance(owner, tag),
            readable.governance_token_balance(owner, tag),
            readable.stability_deposit(owner, tag),
            readable.stake(owner, tag),
            readable.frontend_status(owner, tag)
        )?;

        Ok(UserState {
            trove_before_redistribution,
            debt_token_balance,
            native_balance,
            collateral_surplus_balance,
            governance_token_balance,
            stability_deposit,
            stake,
            own_frontend,
        })
    }
}

#[async_trait]
impl StoreStrategy for BlockPolledStrategy {
    type Extra = BlockPolledExtra;

    fn name(&self) -> &'static str {
        "block-polled"
    }

    fn tracked_address(&self) -> Option<Address> {
        self.tracked
    }

    fn frontend_tag(&self) -> Option<Address> {
        self.frontend_tag
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, block: BlockTag) -> ClientResult<StoreUpdate<BlockPolledExtra>> {
        let number = match block {
            BlockTag::Latest => self.readable.block_number().await?,
            BlockTag::Number(number) => number,
        };
        let tag = BlockTag::Number(number);
        let readable = &self.readable;

        let user = async {
            match self.tracked {
                Some(owner) => self.fetch_user(owner, tag).await.map(Some),
                None => Ok(None),
            }
        };
        let frontend = async {
            match self.frontend_tag {
                Some(frontend) => readable.frontend_status(frontend, tag).await,
                None => Ok(FrontendStatus::Unregistered),
            }
        };

        let (
            (price, number_of_troves, total, total_redistributed, fee_params, block_timestamp),
            (riskiest_trove_before_redistribution, debt_in_stability_pool, total_staked, frontend),
            user,
        ) = tokio::try_join!(
            async {
                tokio::try_join!(
                    readable.price(tag),
                    readable.number_of_troves(tag),
                    readable.total(tag),
                    readable.total_redistributed(tag),
                    readable.fee_params(tag),
                    readable.block_timestamp(tag)
                )
            },
            async {
                tokio::try_join!(
                    readable.riskiest_trove_before_redistribution(tag),
                    readable.debt_in_stability_pool(tag),
                    readable.total_staked(tag),
                    frontend
                )
            },
            user
        )?;

        let mut base = BaseState {
            price,
            number_of_troves,
            total,
            total_redistributed,
            fee_params,
            riskiest_trove_before_redistribution,
            debt_in_stability_pool,
            total_staked,
            frontend,
            ..Default::default()
        };
        if let Some(user) = user {
            base.trove = user
                .trove_before_redistribution
                .apply_redistribution(&total_redistributed);
            base.trove_before_redistribution = user.trove_before_redistribution;
            base.debt_token_balance = user.debt_token_balance;
            base.native_balance = user.native_balance;
            base.collateral_surplus_balance = user.collateral_surplus_balance;
            base.governance_token_balance = user.governance_token_balance;
            base.stability_deposit = user.stability_deposit;
            base.stake = user.stake;
            base.own_frontend = user.own_frontend;
        }

        Ok(StoreUpdate {
            base,
            extra: BlockPolledExtra { applied_updates: 1 },
            block_tag: number,
            block_timestamp,
        })
    }

    fn reduce_extra(&self, old: &BlockPolledExtra, update: BlockPolledExtra) -> BlockPolledExtra {
        BlockPolledExtra {
            applied_updates: old.applied_updates + update.applied_updates,
        }
    }
}
