//! Trove client chain interaction layer.
//!
//! This crate provides:
//! - The connection traits the client core is written against
//! - Contract bindings for the borrower, trove, hint, price, stability pool
//!   and staking contracts
//! - An Alloy-backed protocol reader pinned to explicit blocks
//! - Transaction submission with replacement detection
//! - New-block notifications over WebSocket or HTTP polling
//! - Typed log decoding for receipt parsing

mod blocks;
mod connection;
pub mod contracts;
mod error;
mod events;
mod provider;
mod sender;

pub use blocks::BlockWatcher;
pub use connection::{
    ApproxHint, BlockSource, BlockTag, CollateralDebt, FeeParams, FrontendRecord,
    InclusionOutcome, NewBlock, ProtocolReader, RedemptionHintsData, ReplacementReason,
    StabilityDepositRecord, StakeRecord, SubmittedTransaction, TransactionSubmitter, TroveRecord,
    TxReceipt,
};
pub use contracts::ProtocolAddresses;
pub use error::{ChainError, ChainResult};
pub use events::decode_logs;
pub use provider::AlloyReader;
pub use sender::{AlloySubmitter, AlloySubmitterBuilder, GasPricing, NonceManager};
