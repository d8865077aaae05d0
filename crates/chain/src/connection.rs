//! The connection seam between the client core and a live chain.
//!
//! Three traits cover everything the core needs:
//! - [`ProtocolReader`]: typed reads of protocol state, pinned to a block
//! - [`TransactionSubmitter`]: gas estimation, submission, inclusion tracking
//! - [`BlockSource`]: a stream of new-block notifications
//!
//! Values cross this seam in raw on-chain form (`U256` with 18 decimals).
//! Conversion into domain types happens in the core.

use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes, Log, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ChainResult;

/// Block at which a read is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Number(u64),
}

impl BlockTag {
    /// Block number, if pinned.
    pub fn number(&self) -> Option<u64> {
        match self {
            Self::Latest => None,
            Self::Number(n) => Some(*n),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::latest(),
            BlockTag::Number(n) => BlockId::number(n),
        }
    }
}

/// Result of one `getApproxHint` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproxHint {
    pub hint: Address,
    /// Distance between the hint's key and the requested key
    pub diff: U256,
    /// Seed to feed into the next batch
    pub latest_random_seed: U256,
}

/// Raw answer of `getRedemptionHints`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionHintsData {
    pub first_hint: Address,
    /// Zero when no trove is left partially redeemed
    pub partial_nicr: U256,
    pub truncated_amount: U256,
}

/// Raw trove record, including its redistribution snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TroveRecord {
    pub status: u8,
    pub collateral: U256,
    pub debt: U256,
    pub stake: U256,
    pub snapshot_collateral: U256,
    pub snapshot_debt: U256,
}

/// Collateral/debt pair (system totals, redistribution totals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollateralDebt {
    pub collateral: U256,
    pub debt: U256,
}

/// Inputs to the fee decay model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeParams {
    pub base_rate: U256,
    pub minute_decay_factor: U256,
    pub beta: U256,
    /// Unix seconds of the last fee-moving operation
    pub last_fee_operation_time: u64,
}

/// Raw stability pool deposit of one depositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StabilityDepositRecord {
    /// Deposit at the time of the last deposit change
    pub initial_value: U256,
    /// Deposit after absorbing liquidations since then
    pub compounded_deposit: U256,
    pub collateral_gain: U256,
    pub governance_token_gain: U256,
    pub frontend_tag: Address,
}

/// Raw staking position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StakeRecord {
    pub staked: U256,
    pub collateral_gain: U256,
    pub debt_token_gain: U256,
}

/// Raw frontend registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendRecord {
    pub registered: bool,
    pub kickback_rate: U256,
}

/// Typed reads of protocol state.
///
/// Hint-search calls always run against the latest block; state reads take
/// an explicit [`BlockTag`] so a caller can assemble a consistent snapshot.
#[async_trait]
pub trait ProtocolReader: Send + Sync {
    async fn block_number(&self) -> ChainResult<u64>;
    async fn block_timestamp(&self, block: BlockTag) -> ChainResult<u64>;

    async fn price(&self, block: BlockTag) -> ChainResult<U256>;
    async fn number_of_troves(&self, block: BlockTag) -> ChainResult<u64>;
    async fn total(&self, block: BlockTag) -> ChainResult<CollateralDebt>;
    async fn total_redistributed(&self, block: BlockTag) -> ChainResult<CollateralDebt>;
    async fn fee_params(&self, block: BlockTag) -> ChainResult<FeeParams>;

    async fn trove(&self, owner: Address, block: BlockTag) -> ChainResult<TroveRecord>;
    async fn debt_token_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256>;
    async fn native_balance(&self, owner: Address, block: BlockTag) -> ChainResult<U256>;
    async fn collateral_surplus(&self, owner: Address, block: BlockTag) -> ChainResult<U256>;

    /// Riskiest trove, the tail of the sorted list (zero when empty).
    async fn last_trove(&self, block: BlockTag) -> ChainResult<Address>;

    async fn debt_in_stability_pool(&self, block: BlockTag) -> ChainResult<U256>;
    async fn stability_deposit(
        &self,
        owner: Address,
        block: BlockTag,
    ) -> ChainResult<StabilityDepositRecord>;
    async fn frontend(&self, address: Address, block: BlockTag) -> ChainResult<FrontendRecord>;
    async fn governance_token_balance(&self, owner: Address, block: BlockTag)
        -> ChainResult<U256>;
    async fn total_staked(&self, block: BlockTag) -> ChainResult<U256>;
    async fn stake(&self, owner: Address, block: BlockTag) -> ChainResult<StakeRecord>;

    async fn first_trove(&self) -> ChainResult<Address>;
    async fn prev_trove(&self, id: Address) -> ChainResult<Address>;
    async fn next_trove(&self, id: Address) -> ChainResult<Address>;
    async fn approx_hint(&self, nicr: U256, trials: u64, seed: U256) -> ChainResult<ApproxHint>;
    async fn find_insert_position(
        &self,
        nicr: U256,
        prev: Address,
        next: Address,
    ) -> ChainResult<(Address, Address)>;
    async fn redemption_hints(
        &self,
        amount: U256,
        price: U256,
        max_iterations: u64,
    ) -> ChainResult<RedemptionHintsData>;
}

/// Receipt of a mined transaction, reduced to what the client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    /// `true` when execution succeeded
    pub status: bool,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

impl From<alloy::rpc::types::TransactionReceipt> for TxReceipt {
    fn from(receipt: alloy::rpc::types::TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            from: receipt.from,
            to: receipt.to,
            status: receipt.status(),
            gas_used: receipt.gas_used,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        }
    }
}

/// Handle to a submitted transaction.
///
/// Carries the fields needed to recognise a replacement sharing the same
/// sender and nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
    /// Latest block at submission time; replacement search starts here
    pub submitted_at_block: u64,
}

/// Why the submitted transaction was superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementReason {
    /// Same destination, calldata and value, only the fee changed
    Repriced,
    /// Zero-value self-transfer with empty calldata
    Cancelled,
    /// Anything else reusing the nonce
    Replaced,
}

impl ReplacementReason {
    /// Classify `replacement` against the original submission.
    pub fn classify(
        original: &SubmittedTransaction,
        replacement_to: Option<Address>,
        replacement_input: &Bytes,
        replacement_value: U256,
    ) -> Self {
        if replacement_to == original.to
            && *replacement_input == original.input
            && replacement_value == original.value
        {
            Self::Repriced
        } else if replacement_input.is_empty()
            && replacement_to == Some(original.from)
            && replacement_value.is_zero()
        {
            Self::Cancelled
        } else {
            Self::Replaced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repriced => "repriced",
            Self::Cancelled => "cancelled",
            Self::Replaced => "replaced",
        }
    }
}

/// What waiting for inclusion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionOutcome {
    /// The transaction itself was mined
    Mined(TxReceipt),
    /// Another transaction with the same sender and nonce was mined instead
    Replaced {
        reason: ReplacementReason,
        receipt: TxReceipt,
    },
}

/// Submission and inclusion tracking.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Address transactions are sent from, if a signer is attached.
    fn sender_address(&self) -> Option<Address>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> ChainResult<u64>;

    async fn submit(&self, tx: TransactionRequest) -> ChainResult<SubmittedTransaction>;

    /// Look the receipt up once, without waiting.
    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>>;

    /// Wait until the transaction, or a replacement, is mined with
    /// `confirmations` blocks on top. No timeout.
    async fn wait_for_inclusion(
        &self,
        tx: &SubmittedTransaction,
        confirmations: u64,
    ) -> ChainResult<InclusionOutcome>;
}

/// New-block notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlock {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

/// Source of new-block events. Dropping the receiver unsubscribes.
pub trait BlockSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<NewBlock>;
}
