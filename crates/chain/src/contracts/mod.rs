//! Contract bindings and the address set of one protocol deployment.

pub mod bindings;

pub use bindings::{
    IActivePool, IBorrowerOperations, ICollSurplusPool, IDebtToken, IHintHelpers, ILQTYStaking,
    ILQTYToken, IPriceFeed, IPriceFeedTestnet, ISortedTroves, IStabilityPool, ITroveManager,
};

use alloy::primitives::Address;

/// Addresses of the protocol contracts the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolAddresses {
    pub borrower_operations: Address,
    pub trove_manager: Address,
    pub sorted_troves: Address,
    pub hint_helpers: Address,
    pub price_feed: Address,
    /// Debt token (LUSD-like)
    pub debt_token: Address,
    pub active_pool: Address,
    pub coll_surplus_pool: Address,
    pub stability_pool: Address,
    /// Staking of the governance token (LQTY-like)
    pub staking: Address,
    pub governance_token: Address,
}
