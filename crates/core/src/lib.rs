//! Trove client core.
//!
//! This crate provides the client side of a collateralized debt position
//! protocol:
//! - Fixed-point decimals, troves and fee prediction
//! - Insertion hints for the remote sorted trove list
//! - Gas limits with headroom for fee decay and list drift
//! - Transaction lifecycle from populated to mined
//! - A block-synchronized state store with read-through caching
//! - Stability pool deposits and governance token staking
//! - Populated protocol operations and a client façade

mod cached;
mod client;
pub mod config;
pub mod constants;
mod decimal;
mod details;
mod error;
mod fees;
mod gas;
mod hints;
mod populatable;
mod readable;
mod stability;
pub mod store;
mod transaction;
mod trove;

#[cfg(test)]
mod mock;

pub use cached::CachedReader;
pub use client::TroveClient;
pub use config::{
    ApplyOrder, ClientConfig, DeploymentRegistry, FeeSlippageConfig, GasConfig, HintsConfig,
    ResolvedDeployment, StoreConfig, TransactionConfig,
};
pub use decimal::{Decimal, DecimalParseError};
pub use details::{
    CollateralGainTransferDetails, LiquidationDetails, RedemptionDetails,
    StabilityDepositChangeDetails, StabilityPoolGainsWithdrawalDetails, TroveAdjustmentDetails,
    TroveClosureDetails, TroveCreationDetails,
};
pub use error::{ClientError, ClientResult, UserInputError};
pub use fees::Fees;
pub use gas::{GasEstimate, GasEstimator};
pub use hints::{HintFinder, RedemptionHints};
pub use populatable::{PopulatableTroves, PopulateOptions, PopulatedRedemption};
pub use readable::ReadableTroves;
pub use stability::{FrontendStatus, StabilityDeposit, StabilityDepositChange, Stake, StakeChange};
pub use store::{
    BaseState, BlockPolledExtra, BlockPolledStrategy, Clock, DerivedState, ListenerId, Snapshot,
    StateChange, StateStore, StoreChange, StoreHandle, StoreStrategy, StoreUpdate,
};
pub use transaction::{
    FailedReceipt, MinedReceipt, PopulatedTransaction, ReceiptParser, SentTransaction,
    SucceededReceipt, TransactionReceipt,
};
pub use trove::{
    CollateralChange, DebtChange, Hintable, SetToZero, Trove, TroveAdjustmentParams, TroveChange,
    TroveClosureParams, TroveCreationError, TroveCreationParams, TroveStatus,
    TroveWithPendingRedistribution, UserTrove,
};
