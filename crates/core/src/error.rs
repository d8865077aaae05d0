//! Error taxonomy of the client.
//!
//! Callers branch on these variants. In particular a reverted transaction
//! and a cancelled one are different outcomes and must stay distinguishable.

use trove_chain::{ChainError, ReplacementReason, TxReceipt};

use crate::decimal::Decimal;

/// Bad input, rejected before anything is sent to the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserInputError {
    #[error("pending redistribution must be applied to this trove before hinting")]
    RedistributionNotApplied,

    #[error("invalid trove parameters: {0}")]
    InvalidTroveParams(String),

    #[error(
        "debt of {debt} would fall below the minimum of {minimum} if the borrowing rate \
         decayed over the next {tolerance_minutes} minutes"
    )]
    DebtBelowMinimum {
        debt: Decimal,
        minimum: Decimal,
        tolerance_minutes: u64,
    },

    #[error("redemption amount too low (try at least {minimum})")]
    RedemptionAmountTooLow { minimum: Decimal },

    #[error("net debt undefined: debt {debt} is below the liquidation reserve")]
    NetDebtBelowReserve { debt: Decimal },

    #[error("no troves given to liquidate")]
    NothingToLiquidate,
}

/// Top-level error returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    UserInput(#[from] UserInputError),

    /// Reported by the connection layer; never retried here.
    #[error("network error: {0}")]
    Network(#[from] ChainError),

    /// The transaction's nonce was taken by a non-equivalent transaction.
    #[error("transaction {} {}", .receipt.transaction_hash, .reason.as_str())]
    TransactionCancelled {
        reason: ReplacementReason,
        /// Receipt of the transaction that was mined instead
        receipt: Box<TxReceipt>,
    },

    #[error("transaction {} reverted", .receipt.transaction_hash)]
    TransactionReverted { receipt: Box<TxReceipt> },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("no deployment known for chain {chain_id}")]
    UnsupportedNetwork { chain_id: u64 },

    #[error("invalid deployment: {0}")]
    InvalidDeployment(String),
}

impl ClientError {
    pub fn is_user_input(&self) -> bool {
        matches!(self, Self::UserInput(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::TransactionCancelled { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
