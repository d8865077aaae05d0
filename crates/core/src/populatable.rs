//! Protocol operations built into ready-to-send transactions.
//!
//! Populating an operation does all the reads it needs (fees, the trove,
//! hints), computes the gas limit with headroom, and returns a
//! [`PopulatedTransaction`] carrying the parser for its receipt. Any failure
//! along the way aborts before a transaction object exists.

use std::sync::Arc;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use tracing::{debug, instrument};
use trove_chain::contracts::{
    IBorrowerOperations, IDebtToken, ILQTYStaking, ILQTYToken, IPriceFeedTestnet, IStabilityPool,
    ITroveManager,
};
use trove_chain::{BlockTag, ChainError, ProtocolAddresses, TransactionSubmitter};

use crate::config::ClientConfig;
use crate::constants::MINIMUM_NET_DEBT;
use crate::decimal::Decimal;
use crate::details::{
    collateral_gain_transfer_parser, liquidation_parser, no_details, redemption_parser,
    stability_deposit_topup_parser, stability_deposit_withdrawal_parser,
    stability_pool_gains_parser, trove_adjustment_parser, trove_closure_parser,
    trove_creation_parser, CollateralGainTransferDetails, LiquidationDetails, RedemptionDetails,
    StabilityDepositChangeDetails, StabilityPoolGainsWithdrawalDetails, TroveAdjustmentDetails,
    TroveClosureDetails, TroveCreationDetails,
};
use crate::error::{ClientError, ClientResult, UserInputError};
use crate::gas::{GasEstimate, GasEstimator};
use crate::hints::HintFinder;
use crate::readable::ReadableTroves;
use crate::transaction::{PopulatedTransaction, ReceiptParser};
use crate::trove::{CollateralChange, DebtChange, Trove, TroveAdjustmentParams, TroveCreationParams};

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateOptions {
    /// Highest borrowing rate accepted on-chain; defaults to the current
    /// rate plus the configured slippage
    pub max_borrowing_rate: Option<Decimal>,
    /// Explicit gas limit; skips estimation and the decay check
    pub gas_limit: Option<u64>,
}

impl PopulateOptions {
    pub fn with_max_borrowing_rate(mut self, rate: Decimal) -> Self {
        self.max_borrowing_rate = Some(rate);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// A redemption that may redeem less than asked for.
///
/// The protocol won't leave a trove with less than the minimum net debt, so
/// the amount is truncated to what can be redeemed cleanly.
#[derive(Debug)]
pub struct PopulatedRedemption {
    populated: PopulatedTransaction<RedemptionDetails>,
    attempted_amount: Decimal,
    redeemable_amount: Decimal,
    max_redemption_rate: Option<Decimal>,
}

impl PopulatedRedemption {
    pub fn attempted_amount(&self) -> Decimal {
        self.attempted_amount
    }

    pub fn redeemable_amount(&self) -> Decimal {
        self.redeemable_amount
    }

    pub fn is_truncated(&self) -> bool {
        self.redeemable_amount < self.attempted_amount
    }

    pub fn populated(&self) -> &PopulatedTransaction<RedemptionDetails> {
        &self.populated
    }

    pub fn into_populated(self) -> PopulatedTransaction<RedemptionDetails> {
        self.populated
    }
}

/// Builds protocol transactions.
pub struct PopulatableTroves {
    readable: ReadableTroves,
    hints: HintFinder,
    gas: GasEstimator,
    submitter: Arc<dyn TransactionSubmitter>,
    addresses: ProtocolAddresses,
    price_feed_is_testnet: bool,
    frontend_tag: Option<Address>,
    config: ClientConfig,
}

impl PopulatableTroves {
    pub fn new(
        readable: ReadableTroves,
        hints: HintFinder,
        submitter: Arc<dyn TransactionSubmitter>,
        addresses: ProtocolAddresses,
        price_feed_is_testnet: bool,
        config: ClientConfig,
    ) -> Self {
        let gas = GasEstimator::new(submitter.clone(), config.gas.clone());
        Self {
            readable,
            hints,
            gas,
            submitter,
            addresses,
            price_feed_is_testnet,
            frontend_tag: None,
            config,
        }
    }

    /// Frontend credited for stability deposits that don't name one.
    pub fn with_frontend_tag(mut self, frontend_tag: Address) -> Self {
        self.frontend_tag = Some(frontend_tag).filter(|tag| !tag.is_zero());
        self
    }

    pub fn readable(&self) -> &ReadableTroves {
        &self.readable
    }

    pub fn hints(&self) -> &HintFinder {
        &self.hints
    }

    pub fn gas(&self) -> &GasEstimator {
        &self.gas
    }

    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    fn owner(&self) -> ClientResult<Address> {
        Ok(self.submitter.sender_address().ok_or(ChainError::NoSigner)?)
    }

    fn request(&self, to: Address, call: &impl SolCall, value: Option<U256>) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .with_to(to)
            .with_input(call.abi_encode());
        if let Some(value) = value.filter(|v| !v.is_zero()) {
            tx.set_value(value);
        }
        if let Some(from) = self.submitter.sender_address() {
            tx.set_from(from);
        }
        tx
    }

    fn finish<D>(
        &self,
        mut tx: TransactionRequest,
        estimate: Option<GasEstimate>,
        parser: ReceiptParser<D>,
    ) -> PopulatedTransaction<D> {
        if let Some(estimate) = estimate {
            tx.set_gas_limit(estimate.gas_limit);
        }
        PopulatedTransaction::new(
            tx,
            parser,
            estimate.map(|e| e.gas_headroom),
            self.submitter.clone(),
            self.config.transactions.confirmations,
        )
    }

    /// Estimate with fixed headroom unless the caller set a limit.
    async fn fixed_gas(
        &self,
        tx: &mut TransactionRequest,
        options: PopulateOptions,
        headroom: u64,
    ) -> ClientResult<Option<GasEstimate>> {
        match options.gas_limit {
            Some(limit) => {
                tx.set_gas_limit(limit);
                Ok(None)
            }
            None => Ok(Some(self.gas.estimate_with_headroom(tx, headroom).await?)),
        }
    }

    /// Open a trove for the sender.
    #[instrument(skip(self), level = "debug")]
    pub async fn open_trove(
        &self,
        params: TroveCreationParams,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveCreationDetails>> {
        let fees = self.readable.fees(BlockTag::Latest).await?;
        let borrowing_rate = fees.borrowing_rate(None);
        let new_trove = Trove::create(&params, borrowing_rate);
        let (upper, lower) = self.hints.find_hints(&new_trove, None).await?;

        let max_borrowing_rate = options
            .max_borrowing_rate
            .unwrap_or(borrowing_rate + self.config.fees.borrowing_rate_slippage);

        let open = |borrow: Decimal| IBorrowerOperations::openTroveCall {
            _maxFeePercentage: max_borrowing_rate.raw(),
            _LUSDAmount: borrow.raw(),
            _upperHint: upper,
            _lowerHint: lower,
        };
        let value = Some(params.deposit_collateral.raw());
        let mut tx = self.request(self.addresses.borrower_operations, &open(params.borrow_debt), value);

        let estimate = match options.gas_limit {
            Some(limit) => {
                tx.set_gas_limit(limit);
                None
            }
            None => {
                let decayed_trove = Trove::create(&params, self.gas.decayed_borrowing_rate(&fees));
                self.gas.ensure_decayed_debt_above_minimum(&decayed_trove)?;
                let borrow_simulating_decay = Trove::recreate(&decayed_trove, borrowing_rate)?.borrow_debt;

                let later = self.request(
                    self.addresses.borrower_operations,
                    &open(borrow_simulating_decay),
                    value,
                );
                Some(self.gas.estimate_trove_operation(&tx, Some(&later), true).await?)
            }
        };

        debug!(
            collateral = %params.deposit_collateral,
            borrow = %params.borrow_debt,
            max_rate = %max_borrowing_rate,
            "Populated trove creation"
        );
        Ok(self.finish(tx, estimate, trove_creation_parser(&self.addresses, params)))
    }

    /// Adjust the sender's trove.
    ///
    /// Only borrowing pays the fee, so only borrowing takes the "later"
    /// estimate and the base rate headroom.
    #[instrument(skip(self), level = "debug")]
    pub async fn adjust_trove(
        &self,
        params: TroveAdjustmentParams,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveAdjustmentDetails>> {
        let owner = self.owner()?;
        let borrow = params.borrowed();

        let (user_trove, fees) = tokio::try_join!(self.readable.trove(owner, BlockTag::Latest), async {
            match borrow {
                Some(_) => self.readable.fees(BlockTag::Latest).await.map(Some),
                None => Ok(None),
            }
        })?;
        let trove = user_trove.trove;

        let borrowing_rate = fees.as_ref().map_or(Decimal::ZERO, |fees| fees.borrowing_rate(None));
        let adjusted = trove.adjust(&params, borrowing_rate);
        let (upper, lower) = self.hints.find_hints(&adjusted, Some(owner)).await?;

        let max_borrowing_rate = match borrow {
            Some(_) => options
                .max_borrowing_rate
                .unwrap_or(borrowing_rate + self.config.fees.borrowing_rate_slippage),
            None => Decimal::ZERO,
        };

        let withdrawal = match params.collateral {
            Some(CollateralChange::Withdraw(amount)) => amount,
            _ => Decimal::ZERO,
        };
        let deposit = match params.collateral {
            Some(CollateralChange::Deposit(amount)) => Some(amount.raw()),
            _ => None,
        };
        let repay = match params.debt {
            Some(DebtChange::Repay(amount)) => Some(amount),
            _ => None,
        };

        let adjust = |debt_change: Decimal| IBorrowerOperations::adjustTroveCall {
            _maxFeePercentage: max_borrowing_rate.raw(),
            _collWithdrawal: withdrawal.raw(),
            _LUSDChange: debt_change.raw(),
            _isDebtIncrease: borrow.is_some(),
            _upperHint: upper,
            _lowerHint: lower,
        };
        let debt_change = borrow.or(repay).unwrap_or(Decimal::ZERO);
        let mut tx = self.request(self.addresses.borrower_operations, &adjust(debt_change), deposit);

        let estimate = match options.gas_limit {
            Some(limit) => {
                tx.set_gas_limit(limit);
                None
            }
            None => {
                let decayed_rate = fees
                    .as_ref()
                    .map_or(Decimal::ZERO, |fees| self.gas.decayed_borrowing_rate(fees));
                let decayed_trove = trove.adjust(&params, decayed_rate);
                self.gas.ensure_decayed_debt_above_minimum(&decayed_trove)?;

                match borrow {
                    Some(_) => {
                        let borrow_simulating_decay = trove
                            .adjust_to(&decayed_trove, borrowing_rate)?
                            .borrowed()
                            .unwrap_or(Decimal::ZERO);
                        let later = self.request(
                            self.addresses.borrower_operations,
                            &adjust(borrow_simulating_decay),
                            deposit,
                        );
                        Some(self.gas.estimate_trove_operation(&tx, Some(&later), true).await?)
                    }
                    None => Some(self.gas.estimate_trove_operation(&tx, None, false).await?),
                }
            }
        };

        Ok(self.finish(tx, estimate, trove_adjustment_parser(&self.addresses, params)))
    }

    pub async fn deposit_collateral(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveAdjustmentDetails>> {
        self.adjust_trove(TroveAdjustmentParams::deposit(amount)?, options)
            .await
    }

    pub async fn withdraw_collateral(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveAdjustmentDetails>> {
        self.adjust_trove(TroveAdjustmentParams::withdraw(amount)?, options)
            .await
    }

    pub async fn borrow(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveAdjustmentDetails>> {
        self.adjust_trove(TroveAdjustmentParams::borrow(amount)?, options)
            .await
    }

    pub async fn repay(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveAdjustmentDetails>> {
        self.adjust_trove(TroveAdjustmentParams::repay(amount)?, options)
            .await
    }

    pub async fn close_trove(
        &self,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<TroveClosureDetails>> {
        let mut tx = self.request(
            self.addresses.borrower_operations,
            &IBorrowerOperations::closeTroveCall {},
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, trove_closure_parser(&self.addresses)))
    }

    /// Claim collateral left over after the sender's trove was liquidated
    /// or redeemed in recovery mode.
    pub async fn claim_collateral_surplus(
        &self,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        let mut tx = self.request(
            self.addresses.borrower_operations,
            &IBorrowerOperations::claimCollateralCall {},
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    /// Liquidate the given troves, one call for a single trove and a batch
    /// call otherwise.
    pub async fn liquidate(
        &self,
        borrowers: &[Address],
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<LiquidationDetails>> {
        let trove_manager = self.addresses.trove_manager;
        let mut tx = match borrowers {
            [] => return Err(UserInputError::NothingToLiquidate.into()),
            [borrower] => self.request(
                trove_manager,
                &ITroveManager::liquidateCall { _borrower: *borrower },
                None,
            ),
            _ => self.request(
                trove_manager,
                &ITroveManager::batchLiquidateTrovesCall {
                    _troveArray: borrowers.to_vec(),
                },
                None,
            ),
        };
        let estimate = self
            .fixed_gas(&mut tx, options, self.config.gas.issuance_gas)
            .await?;
        Ok(self.finish(tx, estimate, liquidation_parser(&self.addresses)))
    }

    /// Liquidate up to `max_troves` of the riskiest troves.
    pub async fn liquidate_up_to(
        &self,
        max_troves: u64,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<LiquidationDetails>> {
        let mut tx = self.request(
            self.addresses.trove_manager,
            &ITroveManager::liquidateTrovesCall {
                _n: U256::from(max_troves),
            },
            None,
        );
        let estimate = self
            .fixed_gas(&mut tx, options, self.config.gas.issuance_gas)
            .await?;
        Ok(self.finish(tx, estimate, liquidation_parser(&self.addresses)))
    }

    /// Redeem debt tokens for collateral.
    ///
    /// Without `max_redemption_rate` the limit is the rate the redeemable
    /// amount would pay now plus slippage, capped at 100%.
    #[instrument(skip(self), level = "debug")]
    pub async fn redeem(
        &self,
        amount: Decimal,
        max_redemption_rate: Option<Decimal>,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedRedemption> {
        let (fees, total, price) = tokio::try_join!(
            self.readable.fees(BlockTag::Latest),
            self.readable.total(BlockTag::Latest),
            self.readable.price(BlockTag::Latest)
        )?;
        let hints = self.hints.find_redemption_hints(amount, price).await?;
        let redeemable = hints.truncated_amount;

        let max_rate = max_redemption_rate.unwrap_or_else(|| {
            (fees.redemption_rate(redeemable.div(total.debt), None)
                + self.config.fees.redemption_rate_slippage)
                .min(Decimal::ONE)
        });

        let call = ITroveManager::redeemCollateralCall {
            _LUSDAmount: redeemable.raw(),
            _firstRedemptionHint: hints.first_hint,
            _upperPartialRedemptionHint: hints.upper_partial_hint,
            _lowerPartialRedemptionHint: hints.lower_partial_hint,
            _partialRedemptionHintNICR: hints.partial_nicr.raw(),
            _maxIterations: U256::from(self.config.hints.redemption_max_iterations),
            _maxFee: max_rate.raw(),
        };
        let mut tx = self.request(self.addresses.trove_manager, &call, None);
        let estimate = match options.gas_limit {
            Some(limit) => {
                tx.set_gas_limit(limit);
                None
            }
            None => Some(self.gas.estimate_redemption(&tx).await?),
        };

        debug!(
            attempted = %amount,
            redeemable = %redeemable,
            max_rate = %max_rate,
            "Populated redemption"
        );
        Ok(PopulatedRedemption {
            populated: self.finish(tx, estimate, redemption_parser(&self.addresses)),
            attempted_amount: amount,
            redeemable_amount: redeemable,
            max_redemption_rate,
        })
    }

    /// Re-populate a truncated redemption for its redeemable amount plus the
    /// minimum net debt, so that one more trove can be redeemed against.
    ///
    /// `max_redemption_rate` falls back to the one given to the original
    /// redemption.
    pub async fn increase_redemption_by_minimum_net_debt(
        &self,
        redemption: &PopulatedRedemption,
        max_redemption_rate: Option<Decimal>,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedRedemption> {
        if !redemption.is_truncated() {
            return Err(ClientError::UnsupportedOperation(
                "redemption is not truncated".into(),
            ));
        }
        self.redeem(
            redemption.redeemable_amount + MINIMUM_NET_DEBT,
            max_redemption_rate.or(redemption.max_redemption_rate),
            options,
        )
        .await
    }

    /// Deposit debt tokens into the stability pool.
    ///
    /// Touching a deposit pays out its gains, which may issue rewards.
    pub async fn deposit_debt_in_stability_pool(
        &self,
        amount: Decimal,
        frontend_tag: Option<Address>,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<StabilityDepositChangeDetails>> {
        let frontend_tag = frontend_tag.or(self.frontend_tag).unwrap_or(Address::ZERO);
        let mut tx = self.request(
            self.addresses.stability_pool,
            &IStabilityPool::provideToSPCall {
                _amount: amount.raw(),
                _frontEndTag: frontend_tag,
            },
            None,
        );
        let estimate = self
            .fixed_gas(&mut tx, options, self.config.gas.issuance_gas)
            .await?;
        debug!(amount = %amount, frontend = %frontend_tag, "Populated stability deposit");
        Ok(self.finish(tx, estimate, stability_deposit_topup_parser(&self.addresses, amount)))
    }

    /// Withdraw up to `amount` from the stability pool; the pool caps it at
    /// the compounded deposit.
    pub async fn withdraw_debt_from_stability_pool(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<StabilityDepositChangeDetails>> {
        let mut tx = self.request(
            self.addresses.stability_pool,
            &IStabilityPool::withdrawFromSPCall {
                _amount: amount.raw(),
            },
            None,
        );
        let estimate = self
            .fixed_gas(&mut tx, options, self.config.gas.issuance_gas)
            .await?;
        Ok(self.finish(tx, estimate, stability_deposit_withdrawal_parser(&self.addresses)))
    }

    pub async fn withdraw_gains_from_stability_pool(
        &self,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<StabilityPoolGainsWithdrawalDetails>> {
        let mut tx = self.request(
            self.addresses.stability_pool,
            &IStabilityPool::withdrawFromSPCall { _amount: U256::ZERO },
            None,
        );
        let estimate = self
            .fixed_gas(&mut tx, options, self.config.gas.issuance_gas)
            .await?;
        Ok(self.finish(tx, estimate, stability_pool_gains_parser(&self.addresses)))
    }

    /// Move the sender's stability pool collateral gain into their trove.
    #[instrument(skip(self), level = "debug")]
    pub async fn transfer_collateral_gain_to_trove(
        &self,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<CollateralGainTransferDetails>> {
        let owner = self.owner()?;
        let (user_trove, deposit) = tokio::try_join!(
            self.readable.trove(owner, BlockTag::Latest),
            self.readable.stability_deposit(owner, BlockTag::Latest)
        )?;
        let topped_up = user_trove.trove.add_collateral(deposit.collateral_gain);
        let (upper, lower) = self.hints.find_hints(&topped_up, Some(owner)).await?;

        let mut tx = self.request(
            self.addresses.stability_pool,
            &IStabilityPool::withdrawETHGainToTroveCall {
                _upperHint: upper,
                _lowerHint: lower,
            },
            None,
        );
        let headroom = self.config.gas.list_traversal_gas + self.config.gas.issuance_gas;
        let estimate = self.fixed_gas(&mut tx, options, headroom).await?;
        Ok(self.finish(tx, estimate, collateral_gain_transfer_parser(&self.addresses)))
    }

    pub async fn send_debt_token(
        &self,
        to: Address,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        let mut tx = self.request(
            self.addresses.debt_token,
            &IDebtToken::transferCall {
                recipient: to,
                amount: amount.raw(),
            },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    pub async fn send_governance_token(
        &self,
        to: Address,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        let mut tx = self.request(
            self.addresses.governance_token,
            &ILQTYToken::transferCall {
                recipient: to,
                amount: amount.raw(),
            },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    /// Stake governance tokens; also pays out pending staking gains.
    pub async fn stake(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        let mut tx = self.request(
            self.addresses.staking,
            &ILQTYStaking::stakeCall {
                _LQTYamount: amount.raw(),
            },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    pub async fn unstake(
        &self,
        amount: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        let mut tx = self.request(
            self.addresses.staking,
            &ILQTYStaking::unstakeCall {
                _LQTYamount: amount.raw(),
            },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    pub async fn withdraw_gains_from_staking(
        &self,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        self.unstake(Decimal::ZERO, options).await
    }

    /// Register the sender as a frontend passing `kickback_rate` of the
    /// governance token rewards on to its depositors.
    pub async fn register_frontend(
        &self,
        kickback_rate: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        if kickback_rate > Decimal::ONE {
            return Err(ClientError::UnsupportedOperation(
                "kickback rate must be at most 100%".into(),
            ));
        }
        let mut tx = self.request(
            self.addresses.stability_pool,
            &IStabilityPool::registerFrontEndCall {
                _kickbackRate: kickback_rate.raw(),
            },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }

    /// Set the price of a testnet price feed.
    pub async fn set_price(
        &self,
        price: Decimal,
        options: PopulateOptions,
    ) -> ClientResult<PopulatedTransaction<()>> {
        if !self.price_feed_is_testnet {
            return Err(ClientError::UnsupportedOperation(
                "set_price is only available on a testnet price feed".into(),
            ));
        }
        let mut tx = self.request(
            self.addresses.price_feed,
            &IPriceFeedTestnet::setPriceCall { price: price.raw() },
            None,
        );
        let estimate = self.fixed_gas(&mut tx, options, 0).await?;
        Ok(self.finish(tx, estimate, no_details()))
    }
}

impl std::fmt::Debug for PopulatableTroves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulatableTroves")
            .field("addresses", &self.addresses)
            .field("price_feed_is_testnet", &self.price_feed_is_testnet)
            .field("frontend_tag", &self.frontend_tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MINIMUM_DEBT;
    use crate::mock::{address, d, MockChain};
    use alloy::primitives::Bytes;

    fn addresses() -> ProtocolAddresses {
        ProtocolAddresses {
            borrower_operations: address(0xb0),
            trove_manager: address(0x70),
            price_feed: address(0xfe),
            debt_token: address(0xd0),
            stability_pool: address(0x5b),
            staking: address(0x57),
            governance_token: address(0x6a),
            ..Default::default()
        }
    }

    fn populatable(chain: &Arc<MockChain>) -> PopulatableTroves {
        let config = ClientConfig::default();
        PopulatableTroves::new(
            ReadableTroves::new(chain.clone()),
            HintFinder::with_seed(chain.clone(), config.hints.clone(), 7),
            chain.clone(),
            addresses(),
            false,
            config,
        )
    }

    fn input(tx: &TransactionRequest) -> Bytes {
        tx.input.input().cloned().unwrap_or_default()
    }

    fn open_call(tx: &TransactionRequest) -> IBorrowerOperations::openTroveCall {
        IBorrowerOperations::openTroveCall::abi_decode(&input(tx), true).unwrap()
    }

    fn adjust_call(tx: &TransactionRequest) -> IBorrowerOperations::adjustTroveCall {
        IBorrowerOperations::adjustTroveCall::abi_decode(&input(tx), true).unwrap()
    }

    /// Base rate 2% that loses roughly two thirds of its value over the
    /// default ten minute tolerance.
    fn fast_decay(chain: &MockChain) {
        let mut state = chain.state.write();
        state.fee_params.base_rate = d("0.02").raw();
        state.fee_params.minute_decay_factor = d("0.9").raw();
        state.fee_params.last_fee_operation_time = state.block_timestamp;
    }

    fn creation(collateral: &str, borrow: &str) -> TroveCreationParams {
        TroveCreationParams {
            deposit_collateral: d(collateral),
            borrow_debt: d(borrow),
        }
    }

    #[tokio::test]
    async fn test_open_trove() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        let populatable = populatable(&chain);

        let populated = populatable
            .open_trove(creation("10", "2000"), PopulateOptions::default())
            .await
            .unwrap();

        let call = open_call(populated.raw());
        // 0.5% minimum rate plus 0.5% slippage
        assert_eq!(call._maxFeePercentage, d("0.01").raw());
        assert_eq!(call._LUSDAmount, d("2000").raw());
        assert_eq!(populated.raw().value, Some(d("10").raw()));

        let new_trove = Trove::create(&creation("10", "2000"), d("0.005"));
        assert!(chain.is_valid_position(
            new_trove.nominal_collateral_ratio(),
            call._upperHint,
            call._lowerHint
        ));

        // no decay: both estimates 300k, traversal and base rate terms on top
        let limit = 300_000 + 80_000 + 10_000 + 4 * 1_414;
        assert_eq!(populated.raw().gas, Some(limit));
        assert_eq!(populated.gas_headroom(), Some(limit - 300_000));
        assert_eq!(chain.estimated().len(), 2);
    }

    #[tokio::test]
    async fn test_open_trove_later_estimate_dominates() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        fast_decay(&chain);
        chain.set_gas_fn(|tx| {
            let call = open_call(tx);
            if call._LUSDAmount < d("2000").raw() {
                320_000
            } else {
                300_000
            }
        });
        let populatable = populatable(&chain);

        let populated = populatable
            .open_trove(creation("10", "2000"), PopulateOptions::default())
            .await
            .unwrap();

        let estimated = chain.estimated();
        assert_eq!(estimated.len(), 2);
        let later = open_call(&estimated[1]);
        assert!(later._LUSDAmount < d("2000").raw());

        let limit = 320_000 + 80_000 + 10_000 + 4 * 1_414;
        assert_eq!(populated.raw().gas, Some(limit));
        assert_eq!(populated.gas_headroom(), Some(limit - 300_000));
    }

    #[tokio::test]
    async fn test_open_trove_rejects_debt_below_minimum_after_decay() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        fast_decay(&chain);
        let populatable = populatable(&chain);

        // 200 + 1760 * 1.025 clears the minimum now, but not once the fee
        // has decayed towards 1.2%
        let err = populatable
            .open_trove(creation("10", "1760"), PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UserInput(UserInputError::DebtBelowMinimum { minimum, .. }) if minimum == MINIMUM_DEBT
        ));
        assert_eq!(chain.calls("estimate_gas"), 0);
    }

    #[tokio::test]
    async fn test_explicit_gas_limit_skips_estimation() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        fast_decay(&chain);
        let populatable = populatable(&chain);

        let populated = populatable
            .open_trove(
                creation("10", "1760"),
                PopulateOptions::default()
                    .with_gas_limit(500_000)
                    .with_max_borrowing_rate(d("0.05")),
            )
            .await
            .unwrap();

        assert_eq!(populated.raw().gas, Some(500_000));
        assert_eq!(populated.gas_headroom(), None);
        assert_eq!(open_call(populated.raw())._maxFeePercentage, d("0.05").raw());
        assert_eq!(chain.calls("estimate_gas"), 0);
    }

    #[tokio::test]
    async fn test_repay_has_no_fee_or_base_rate_headroom() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        chain.set_trove(MockChain::SENDER, d("10"), d("3000"));
        let populatable = populatable(&chain);

        let populated = populatable
            .repay(d("500"), PopulateOptions::default())
            .await
            .unwrap();

        let call = adjust_call(populated.raw());
        assert_eq!(call._maxFeePercentage, U256::ZERO);
        assert_eq!(call._LUSDChange, d("500").raw());
        assert!(!call._isDebtIncrease);
        assert_eq!(chain.calls("fee_params"), 0);

        assert_eq!(chain.estimated().len(), 1);
        assert_eq!(populated.raw().gas, Some(300_000 + 80_000));
        assert_eq!(populated.gas_headroom(), Some(80_000));
    }

    #[tokio::test]
    async fn test_borrow_estimates_twice() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        chain.set_trove(MockChain::SENDER, d("10"), d("3000"));
        let populatable = populatable(&chain);

        let populated = populatable
            .borrow(d("100"), PopulateOptions::default())
            .await
            .unwrap();

        let call = adjust_call(populated.raw());
        assert!(call._isDebtIncrease);
        assert_eq!(call._maxFeePercentage, d("0.01").raw());
        assert_eq!(chain.estimated().len(), 2);
        assert_eq!(
            populated.gas_headroom(),
            Some(80_000 + 10_000 + 4 * 1_414)
        );
    }

    #[tokio::test]
    async fn test_deposit_sends_value_and_guards_own_slot() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        let owner = MockChain::SENDER;
        chain.set_trove(owner, d("10"), d("3000"));
        // the sender's trove sits in the list where the adjusted one lands
        let mut sorted = chain.sorted();
        let adjusted = Trove::new(d("11"), d("3000")).nominal_collateral_ratio();
        sorted.push((owner, adjusted));
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        chain.set_sorted(sorted);

        let populatable = populatable(&chain);
        let populated = populatable
            .deposit_collateral(d("1"), PopulateOptions::default())
            .await
            .unwrap();

        assert_eq!(populated.raw().value, Some(d("1").raw()));
        let call = adjust_call(populated.raw());
        assert_ne!(call._upperHint, owner);
        assert_ne!(call._lowerHint, owner);
    }

    #[tokio::test]
    async fn test_adjust_without_signer_is_network_error() {
        let chain = Arc::new(MockChain::without_signer());
        let populatable = populatable(&chain);

        let err = populatable
            .repay(d("1"), PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_zero_amount_is_user_input_error() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let err = populatable
            .withdraw_collateral(Decimal::ZERO, PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_user_input());
        assert_eq!(chain.calls("trove"), 0);
    }

    #[tokio::test]
    async fn test_liquidate_single_and_batch() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let single = populatable
            .liquidate(&[address(1)], PopulateOptions::default())
            .await
            .unwrap();
        let call = ITroveManager::liquidateCall::abi_decode(&input(single.raw()), true).unwrap();
        assert_eq!(call._borrower, address(1));
        assert_eq!(single.gas_headroom(), Some(50_000));

        let batch = populatable
            .liquidate(&[address(1), address(2)], PopulateOptions::default())
            .await
            .unwrap();
        let call =
            ITroveManager::batchLiquidateTrovesCall::abi_decode(&input(batch.raw()), true).unwrap();
        assert_eq!(call._troveArray, vec![address(1), address(2)]);

        let err = populatable
            .liquidate(&[], PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UserInput(UserInputError::NothingToLiquidate)
        ));
    }

    #[tokio::test]
    async fn test_liquidate_up_to() {
        let chain = Arc::new(MockChain::new());
        let populated = populatable(&chain)
            .liquidate_up_to(30, PopulateOptions::default())
            .await
            .unwrap();

        let call = ITroveManager::liquidateTrovesCall::abi_decode(&input(populated.raw()), true).unwrap();
        assert_eq!(call._n, U256::from(30));
        assert_eq!(populated.raw().to, Some(addresses().trove_manager.into()));
    }

    #[tokio::test]
    async fn test_redeem_truncated_with_default_rate() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        chain.set_redemption_hints(address(10), Decimal::ZERO, d("5000"));
        let populatable = populatable(&chain);

        let redemption = populatable
            .redeem(d("6000"), None, PopulateOptions::default())
            .await
            .unwrap();
        assert!(redemption.is_truncated());
        assert_eq!(redemption.attempted_amount(), d("6000"));
        assert_eq!(redemption.redeemable_amount(), d("5000"));

        let call = ITroveManager::redeemCollateralCall::abi_decode(
            &input(redemption.populated().raw()),
            true,
        )
        .unwrap();
        assert_eq!(call._LUSDAmount, d("5000").raw());
        assert_eq!(call._firstRedemptionHint, address(10));
        assert_eq!(call._upperPartialRedemptionHint, Address::ZERO);
        assert_eq!(call._maxIterations, U256::from(70));
        // 0.5% + 5000 / 100000 / 2 + 0.1% slippage
        assert_eq!(call._maxFee, d("0.031").raw());
        assert_eq!(
            redemption.populated().gas_headroom(),
            Some(10_000 + 4 * 1_414)
        );
    }

    #[tokio::test]
    async fn test_increase_truncated_redemption() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        chain.set_redemption_hints(address(10), Decimal::ZERO, d("5000"));
        let populatable = populatable(&chain);

        let redemption = populatable
            .redeem(d("6000"), Some(d("0.05")), PopulateOptions::default())
            .await
            .unwrap();

        chain.set_redemption_hints(address(10), Decimal::ZERO, d("6800"));
        let increased = populatable
            .increase_redemption_by_minimum_net_debt(&redemption, None, PopulateOptions::default())
            .await
            .unwrap();
        assert_eq!(increased.attempted_amount(), d("6800"));
        assert!(!increased.is_truncated());

        let call = ITroveManager::redeemCollateralCall::abi_decode(
            &input(increased.populated().raw()),
            true,
        )
        .unwrap();
        assert_eq!(call._maxFee, d("0.05").raw());

        let err = populatable
            .increase_redemption_by_minimum_net_debt(&increased, None, PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_redeem_too_little() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        let err = populatable(&chain)
            .redeem(d("100"), None, PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_user_input());
        assert_eq!(chain.calls("estimate_gas"), 0);
    }

    #[tokio::test]
    async fn test_set_price_requires_testnet_feed() {
        let chain = Arc::new(MockChain::new());
        let err = populatable(&chain)
            .set_price(d("250"), PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedOperation(_)));

        let config = ClientConfig::default();
        let testnet = PopulatableTroves::new(
            ReadableTroves::new(chain.clone()),
            HintFinder::with_seed(chain.clone(), config.hints.clone(), 7),
            chain.clone(),
            addresses(),
            true,
            config,
        );
        let populated = testnet
            .set_price(d("250"), PopulateOptions::default())
            .await
            .unwrap();
        let call = IPriceFeedTestnet::setPriceCall::abi_decode(&input(populated.raw()), true).unwrap();
        assert_eq!(call.price, d("250").raw());
    }

    #[tokio::test]
    async fn test_stability_deposit_uses_frontend_tag() {
        let chain = Arc::new(MockChain::new());

        let untagged = populatable(&chain)
            .deposit_debt_in_stability_pool(d("1000"), None, PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::provideToSPCall::abi_decode(&input(untagged.raw()), true).unwrap();
        assert_eq!(call._amount, d("1000").raw());
        assert_eq!(call._frontEndTag, Address::ZERO);
        assert_eq!(untagged.raw().to, Some(addresses().stability_pool.into()));
        assert_eq!(untagged.gas_headroom(), Some(50_000));

        let tagged = populatable(&chain).with_frontend_tag(address(0xf0));
        let populated = tagged
            .deposit_debt_in_stability_pool(d("1000"), None, PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::provideToSPCall::abi_decode(&input(populated.raw()), true).unwrap();
        assert_eq!(call._frontEndTag, address(0xf0));

        // an explicit tag wins over the configured one
        let populated = tagged
            .deposit_debt_in_stability_pool(d("1000"), Some(address(0xf1)), PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::provideToSPCall::abi_decode(&input(populated.raw()), true).unwrap();
        assert_eq!(call._frontEndTag, address(0xf1));
    }

    #[tokio::test]
    async fn test_stability_withdrawals() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let withdrawal = populatable
            .withdraw_debt_from_stability_pool(d("250"), PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::withdrawFromSPCall::abi_decode(&input(withdrawal.raw()), true).unwrap();
        assert_eq!(call._amount, d("250").raw());
        assert_eq!(withdrawal.gas_headroom(), Some(50_000));

        let gains = populatable
            .withdraw_gains_from_stability_pool(PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::withdrawFromSPCall::abi_decode(&input(gains.raw()), true).unwrap();
        assert_eq!(call._amount, U256::ZERO);
    }

    #[tokio::test]
    async fn test_collateral_gain_transfer_hints_for_topped_up_trove() {
        let chain = Arc::new(MockChain::with_sorted_troves(10));
        let owner = MockChain::SENDER;
        chain.set_trove(owner, d("10"), d("3000"));
        chain.set_stability_deposit(owner, d("1000"), d("900"), d("2"));
        let populatable = populatable(&chain);

        let populated = populatable
            .transfer_collateral_gain_to_trove(PopulateOptions::default())
            .await
            .unwrap();

        let call =
            IStabilityPool::withdrawETHGainToTroveCall::abi_decode(&input(populated.raw()), true).unwrap();
        let topped_up = Trove::new(d("12"), d("3000"));
        assert!(chain.is_valid_position(
            topped_up.nominal_collateral_ratio(),
            call._upperHint,
            call._lowerHint
        ));
        assert_eq!(chain.calls("stability_deposit"), 1);
        assert_eq!(populated.gas_headroom(), Some(80_000 + 50_000));
    }

    #[tokio::test]
    async fn test_token_sends() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let debt = populatable
            .send_debt_token(address(9), d("12.5"), PopulateOptions::default())
            .await
            .unwrap();
        let call = IDebtToken::transferCall::abi_decode(&input(debt.raw()), true).unwrap();
        assert_eq!(call.recipient, address(9));
        assert_eq!(call.amount, d("12.5").raw());
        assert_eq!(debt.raw().to, Some(addresses().debt_token.into()));
        assert_eq!(debt.gas_headroom(), Some(0));

        let governance = populatable
            .send_governance_token(address(9), d("3"), PopulateOptions::default())
            .await
            .unwrap();
        let call = ILQTYToken::transferCall::abi_decode(&input(governance.raw()), true).unwrap();
        assert_eq!(call.amount, d("3").raw());
        assert_eq!(governance.raw().to, Some(addresses().governance_token.into()));
    }

    #[tokio::test]
    async fn test_staking_operations() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let stake = populatable.stake(d("40"), PopulateOptions::default()).await.unwrap();
        let call = ILQTYStaking::stakeCall::abi_decode(&input(stake.raw()), true).unwrap();
        assert_eq!(call._LQTYamount, d("40").raw());
        assert_eq!(stake.raw().to, Some(addresses().staking.into()));

        let unstake = populatable.unstake(d("15"), PopulateOptions::default()).await.unwrap();
        let call = ILQTYStaking::unstakeCall::abi_decode(&input(unstake.raw()), true).unwrap();
        assert_eq!(call._LQTYamount, d("15").raw());

        let gains = populatable
            .withdraw_gains_from_staking(PopulateOptions::default())
            .await
            .unwrap();
        let call = ILQTYStaking::unstakeCall::abi_decode(&input(gains.raw()), true).unwrap();
        assert_eq!(call._LQTYamount, U256::ZERO);
    }

    #[tokio::test]
    async fn test_register_frontend() {
        let chain = Arc::new(MockChain::new());
        let populatable = populatable(&chain);

        let populated = populatable
            .register_frontend(d("0.8"), PopulateOptions::default())
            .await
            .unwrap();
        let call = IStabilityPool::registerFrontEndCall::abi_decode(&input(populated.raw()), true).unwrap();
        assert_eq!(call._kickbackRate, d("0.8").raw());

        let err = populatable
            .register_frontend(d("1.5"), PopulateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedOperation(_)));
        assert_eq!(chain.calls("estimate_gas"), 1);
    }
}
