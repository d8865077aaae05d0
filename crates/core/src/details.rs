//! Operation details extracted from successful receipts.
//!
//! Each parser reads the events of the contracts involved in one operation.
//! Parsing is a pure function of the receipt: the same receipt always
//! yields the same details.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use trove_chain::contracts::{
    IActivePool, IBorrowerOperations, IDebtToken, IStabilityPool, ITroveManager,
};
use trove_chain::{decode_logs, ProtocolAddresses, TxReceipt};

use crate::decimal::Decimal;
use crate::stability::StabilityDepositChange;
use crate::transaction::ReceiptParser;
use crate::trove::{Trove, TroveAdjustmentParams, TroveClosureParams, TroveCreationParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveCreationDetails {
    pub params: TroveCreationParams,
    pub new_trove: Trove,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveAdjustmentDetails {
    pub params: TroveAdjustmentParams,
    pub new_trove: Trove,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveClosureDetails {
    pub params: TroveClosureParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationDetails {
    pub liquidated_addresses: Vec<Address>,
    pub total_liquidated: Trove,
    pub collateral_gas_compensation: Decimal,
    pub debt_gas_compensation: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionDetails {
    pub attempted_amount: Decimal,
    pub actual_amount: Decimal,
    pub collateral_taken: Decimal,
    pub fee: Decimal,
}

/// What touching a stability deposit paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StabilityPoolGainsWithdrawalDetails {
    /// Deposit burned by liquidations since the last touch
    pub debt_token_loss: Decimal,
    pub new_debt_token_deposit: Decimal,
    pub collateral_gain: Decimal,
    pub governance_token_reward: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityDepositChangeDetails {
    pub gains: StabilityPoolGainsWithdrawalDetails,
    pub change: StabilityDepositChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralGainTransferDetails {
    pub gains: StabilityPoolGainsWithdrawalDetails,
    pub new_trove: Trove,
}

/// New trove state and borrowing fee emitted by the borrower contract.
fn trove_update(receipt: &TxReceipt, borrower_operations: Address) -> (Trove, Decimal) {
    let new_trove = decode_logs::<IBorrowerOperations::TroveUpdated>(&receipt.logs, borrower_operations)
        .last()
        .map(|event| Trove::new(Decimal::from_raw(event._coll), Decimal::from_raw(event._debt)))
        .unwrap_or(Trove::EMPTY);

    let fee = decode_logs::<IBorrowerOperations::LUSDBorrowingFeePaid>(&receipt.logs, borrower_operations)
        .iter()
        .fold(Decimal::ZERO, |total, event| total + Decimal::from_raw(event._LUSDFee));

    (new_trove, fee)
}

pub fn trove_creation_parser(
    addresses: &ProtocolAddresses,
    params: TroveCreationParams,
) -> ReceiptParser<TroveCreationDetails> {
    let borrower_operations = addresses.borrower_operations;
    Arc::new(move |receipt: &TxReceipt| {
        let (new_trove, fee) = trove_update(receipt, borrower_operations);
        TroveCreationDetails {
            params,
            new_trove,
            fee,
        }
    })
}

pub fn trove_adjustment_parser(
    addresses: &ProtocolAddresses,
    params: TroveAdjustmentParams,
) -> ReceiptParser<TroveAdjustmentDetails> {
    let borrower_operations = addresses.borrower_operations;
    Arc::new(move |receipt: &TxReceipt| {
        let (new_trove, fee) = trove_update(receipt, borrower_operations);
        TroveAdjustmentDetails {
            params,
            new_trove,
            fee,
        }
    })
}

/// Repaid debt is the burn from the owner; withdrawn collateral is what the
/// active pool sent back.
pub fn trove_closure_parser(addresses: &ProtocolAddresses) -> ReceiptParser<TroveClosureDetails> {
    let debt_token = addresses.debt_token;
    let active_pool = addresses.active_pool;
    Arc::new(move |receipt: &TxReceipt| {
        let owner = receipt.from;

        let repaid = decode_logs::<IDebtToken::Transfer>(&receipt.logs, debt_token)
            .iter()
            .filter(|event| event.from == owner && event.to == Address::ZERO)
            .fold(Decimal::ZERO, |total, event| total + Decimal::from_raw(event.value));

        let withdrawn = decode_logs::<IActivePool::EtherSent>(&receipt.logs, active_pool)
            .iter()
            .filter(|event| event._to == owner)
            .fold(Decimal::ZERO, |total, event| total + Decimal::from_raw(event._amount));

        TroveClosureDetails {
            params: TroveClosureParams {
                withdraw_collateral: withdrawn,
                repay_debt: (!repaid.is_zero()).then_some(repaid),
            },
        }
    })
}

pub fn liquidation_parser(addresses: &ProtocolAddresses) -> ReceiptParser<LiquidationDetails> {
    let trove_manager = addresses.trove_manager;
    Arc::new(move |receipt: &TxReceipt| {
        let liquidated_addresses = decode_logs::<ITroveManager::TroveLiquidated>(&receipt.logs, trove_manager)
            .into_iter()
            .map(|event| event._borrower)
            .collect();

        let totals = decode_logs::<ITroveManager::Liquidation>(&receipt.logs, trove_manager);
        let (total_liquidated, collateral_gas_compensation, debt_gas_compensation) = totals
            .last()
            .map(|event| {
                (
                    Trove::new(
                        Decimal::from_raw(event._liquidatedColl),
                        Decimal::from_raw(event._liquidatedDebt),
                    ),
                    Decimal::from_raw(event._collGasCompensation),
                    Decimal::from_raw(event._LUSDGasCompensation),
                )
            })
            .unwrap_or((Trove::EMPTY, Decimal::ZERO, Decimal::ZERO));

        LiquidationDetails {
            liquidated_addresses,
            total_liquidated,
            collateral_gas_compensation,
            debt_gas_compensation,
        }
    })
}

pub fn redemption_parser(addresses: &ProtocolAddresses) -> ReceiptParser<RedemptionDetails> {
    let trove_manager = addresses.trove_manager;
    Arc::new(move |receipt: &TxReceipt| {
        decode_logs::<ITroveManager::Redemption>(&receipt.logs, trove_manager)
            .last()
            .map(|event| RedemptionDetails {
                attempted_amount: Decimal::from_raw(event._attemptedLUSDAmount),
                actual_amount: Decimal::from_raw(event._actualLUSDAmount),
                collateral_taken: Decimal::from_raw(event._ETHSent),
                fee: Decimal::from_raw(event._ETHFee),
            })
            .unwrap_or(RedemptionDetails {
                attempted_amount: Decimal::ZERO,
                actual_amount: Decimal::ZERO,
                collateral_taken: Decimal::ZERO,
                fee: Decimal::ZERO,
            })
    })
}

fn stability_pool_gains(
    receipt: &TxReceipt,
    stability_pool: Address,
) -> StabilityPoolGainsWithdrawalDetails {
    let logs = &receipt.logs;
    let new_debt_token_deposit = decode_logs::<IStabilityPool::UserDepositChanged>(logs, stability_pool)
        .first()
        .map_or(Decimal::ZERO, |event| Decimal::from_raw(event._newDeposit));
    let (collateral_gain, debt_token_loss) =
        decode_logs::<IStabilityPool::ETHGainWithdrawn>(logs, stability_pool)
            .first()
            .map_or((Decimal::ZERO, Decimal::ZERO), |event| {
                (Decimal::from_raw(event._ETH), Decimal::from_raw(event._LUSDLoss))
            });
    let governance_token_reward = decode_logs::<IStabilityPool::LQTYPaidToDepositor>(logs, stability_pool)
        .first()
        .map_or(Decimal::ZERO, |event| Decimal::from_raw(event._LQTY));

    StabilityPoolGainsWithdrawalDetails {
        debt_token_loss,
        new_debt_token_deposit,
        collateral_gain,
        governance_token_reward,
    }
}

pub fn stability_pool_gains_parser(
    addresses: &ProtocolAddresses,
) -> ReceiptParser<StabilityPoolGainsWithdrawalDetails> {
    let stability_pool = addresses.stability_pool;
    Arc::new(move |receipt: &TxReceipt| stability_pool_gains(receipt, stability_pool))
}

pub fn stability_deposit_topup_parser(
    addresses: &ProtocolAddresses,
    amount: Decimal,
) -> ReceiptParser<StabilityDepositChangeDetails> {
    let stability_pool = addresses.stability_pool;
    Arc::new(move |receipt: &TxReceipt| StabilityDepositChangeDetails {
        gains: stability_pool_gains(receipt, stability_pool),
        change: StabilityDepositChange::Deposit(amount),
    })
}

/// The withdrawn amount is what the pool transferred to the depositor,
/// which may be less than requested after liquidations.
pub fn stability_deposit_withdrawal_parser(
    addresses: &ProtocolAddresses,
) -> ReceiptParser<StabilityDepositChangeDetails> {
    let stability_pool = addresses.stability_pool;
    let debt_token = addresses.debt_token;
    Arc::new(move |receipt: &TxReceipt| {
        let gains = stability_pool_gains(receipt, stability_pool);
        let withdrawn = decode_logs::<IDebtToken::Transfer>(&receipt.logs, debt_token)
            .iter()
            .find(|event| event.from == stability_pool && event.to == receipt.from)
            .map_or(Decimal::ZERO, |event| Decimal::from_raw(event.value));

        StabilityDepositChangeDetails {
            gains,
            change: StabilityDepositChange::Withdraw {
                amount: withdrawn,
                withdraw_all: gains.new_debt_token_deposit.is_zero(),
            },
        }
    })
}

pub fn collateral_gain_transfer_parser(
    addresses: &ProtocolAddresses,
) -> ReceiptParser<CollateralGainTransferDetails> {
    let stability_pool = addresses.stability_pool;
    let borrower_operations = addresses.borrower_operations;
    Arc::new(move |receipt: &TxReceipt| CollateralGainTransferDetails {
        gains: stability_pool_gains(receipt, stability_pool),
        new_trove: trove_update(receipt, borrower_operations).0,
    })
}

/// For operations without details.
pub fn no_details() -> ReceiptParser<()> {
    Arc::new(|_: &TxReceipt| ())
}
