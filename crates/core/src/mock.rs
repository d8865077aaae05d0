//! In-memory chain for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloy::primitives::{Address, Log, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use trove_chain::{
    ApproxHint, BlockTag, ChainError, ChainResult, CollateralDebt, FeeParams, FrontendRecord,
    InclusionOutcome, ProtocolReader, RedemptionHintsData, ReplacementReason,
    StabilityDepositRecord, StakeRecord, SubmittedTransaction, TransactionSubmitter, TroveRecord,
    TxReceipt,
};

use crate::decimal::Decimal;

/// Deterministic test address for index `i`.
pub(crate) fn address(i: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&i.to_be_bytes());
    Address::from(bytes)
}

pub(crate) fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

type GasFn = Box<dyn Fn(&TransactionRequest) -> u64 + Send + Sync>;

/// Scalar chain state served by the reads.
#[derive(Debug, Clone)]
pub(crate) struct MockState {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub price: Decimal,
    pub total: (Decimal, Decimal),
    pub total_redistributed: (Decimal, Decimal),
    pub fee_params: FeeParams,
    pub redemption: RedemptionHintsData,
    pub debt_in_stability_pool: Decimal,
    pub total_staked: Decimal,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            block_number: 100,
            block_timestamp: 1_700_000_000,
            price: d("200"),
            total: (d("1000"), d("100000")),
            total_redistributed: (Decimal::ZERO, Decimal::ZERO),
            fee_params: FeeParams {
                base_rate: U256::ZERO,
                minute_decay_factor: d("0.999037758833783000").raw(),
                beta: d("2").raw(),
                last_fee_operation_time: 1_700_000_000,
            },
            redemption: RedemptionHintsData {
                first_hint: Address::ZERO,
                partial_nicr: U256::ZERO,
                truncated_amount: U256::ZERO,
            },
            debt_in_stability_pool: d("20000"),
            total_staked: d("1000"),
        }
    }
}

pub(crate) struct MockChain {
    sorted: RwLock<Vec<(Address, Decimal)>>,
    pub state: RwLock<MockState>,
    troves: DashMap<Address, TroveRecord>,
    debt_balances: DashMap<Address, Decimal>,
    deposits: DashMap<Address, StabilityDepositRecord>,
    stakes: DashMap<Address, StakeRecord>,
    frontends: DashMap<Address, FrontendRecord>,
    calls: DashMap<&'static str, usize>,
    approx_calls: Mutex<Vec<(u64, U256, U256)>>,
    redemption_iterations: Mutex<Option<u64>>,
    fail_reads: AtomicBool,

    sender: Option<Address>,
    gas_fn: RwLock<GasFn>,
    estimated: Mutex<Vec<TransactionRequest>>,
    submitted: Mutex<Vec<SubmittedTransaction>>,
    nonce: AtomicU64,
    mined: AtomicBool,
    receipt_status: AtomicBool,
    receipt_logs: Mutex<Vec<Log>>,
    replacement: Mutex<Option<(ReplacementReason, TxReceipt)>>,
}

impl MockChain {
    pub const SENDER: Address = Address::new([0xaa; 20]);

    pub fn new() -> Self {
        Self {
            sorted: RwLock::new(Vec::new()),
            state: RwLock::new(MockState::default()),
            troves: DashMap::new(),
            debt_balances: DashMap::new(),
            deposits: DashMap::new(),
            stakes: DashMap::new(),
            frontends: DashMap::new(),
            calls: DashMap::new(),
            approx_calls: Mutex::new(Vec::new()),
            redemption_iterations: Mutex::new(None),
            fail_reads: AtomicBool::new(false),
            sender: Some(Self::SENDER),
            gas_fn: RwLock::new(Box::new(|_| 300_000)),
            estimated: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            nonce: AtomicU64::new(0),
            mined: AtomicBool::new(true),
            receipt_status: AtomicBool::new(true),
            receipt_logs: Mutex::new(Vec::new()),
            replacement: Mutex::new(None),
        }
    }

    pub fn without_signer() -> Self {
        Self {
            sender: None,
            ..Self::new()
        }
    }

    /// `n` troves with evenly spaced keys, highest first.
    pub fn with_sorted_troves(n: u64) -> Self {
        let chain = Self::new();
        let step = d("0.01");
        let sorted = (0..n)
            .map(|i| {
                let key = d("1.1") + step * Decimal::from_int(n - i);
                (address(i + 1), key)
            })
            .collect();
        chain.set_sorted(sorted);
        chain
    }

    pub fn set_sorted(&self, sorted: Vec<(Address, Decimal)>) {
        *self.sorted.write() = sorted;
    }

    pub fn sorted(&self) -> Vec<(Address, Decimal)> {
        self.sorted.read().clone()
    }

    /// (highest, lowest) key.
    pub fn key_range(&self) -> (Decimal, Decimal) {
        let sorted = self.sorted.read();
        (sorted[0].1, sorted[sorted.len() - 1].1)
    }

    /// Would inserting `nicr` between `prev` and `next` need no traversal?
    pub fn is_valid_position(&self, nicr: Decimal, prev: Address, next: Address) -> bool {
        let sorted = self.sorted.read();
        if sorted.is_empty() {
            return prev == Address::ZERO && next == Address::ZERO;
        }
        let key_of = |id: Address| sorted.iter().find(|(a, _)| *a == id).map(|(_, key)| *key);
        let (Some(prev_key), Some(next_key)) = (key_of(prev), key_of(next)) else {
            return false;
        };
        if prev == next {
            let head = sorted[0].0;
            let tail = sorted[sorted.len() - 1].0;
            return (prev == head && prev_key <= nicr) || (prev == tail && prev_key >= nicr);
        }
        prev_key >= nicr && nicr >= next_key
    }

    pub fn set_trove(&self, owner: Address, collateral: Decimal, debt: Decimal) {
        self.troves.insert(
            owner,
            TroveRecord {
                status: 1,
                collateral: collateral.raw(),
                debt: debt.raw(),
                stake: collateral.raw(),
                snapshot_collateral: U256::ZERO,
                snapshot_debt: U256::ZERO,
            },
        );
    }

    pub fn set_debt_balance(&self, owner: Address, balance: Decimal) {
        self.debt_balances.insert(owner, balance);
    }

    pub fn set_stability_deposit(
        &self,
        owner: Address,
        initial: Decimal,
        current: Decimal,
        collateral_gain: Decimal,
    ) {
        self.deposits.insert(
            owner,
            StabilityDepositRecord {
                initial_value: initial.raw(),
                compounded_deposit: current.raw(),
                collateral_gain: collateral_gain.raw(),
                governance_token_gain: U256::ZERO,
                frontend_tag: Address::ZERO,
            },
        );
    }

    pub fn set_stake(
        &self,
        owner: Address,
        staked: Decimal,
        collateral_gain: Decimal,
        debt_token_gain: Decimal,
    ) {
        self.stakes.insert(
            owner,
            StakeRecord {
                staked: staked.raw(),
                collateral_gain: collateral_gain.raw(),
                debt_token_gain: debt_token_gain.raw(),
            },
        );
    }

    pub fn set_frontend(&self, address: Address, kickback_rate: Decimal) {
        self.frontends.insert(
            address,
            FrontendRecord {
                registered: true,
                kickback_rate: kickback_rate.raw(),
            },
        );
    }

    pub fn set_redemption_hints(&self, first: Address, partial_nicr: Decimal, truncated: Decimal) {
        self.state.write().redemption = RedemptionHintsData {
            first_hint: first,
            partial_nicr: partial_nicr.raw(),
            truncated_amount: truncated.raw(),
        };
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_gas_fn(&self, f: impl Fn(&TransactionRequest) -> u64 + Send + Sync + 'static) {
        *self.gas_fn.write() = Box::new(f);
    }

    pub fn set_mined(&self, mined: bool) {
        self.mined.store(mined, Ordering::SeqCst);
    }

    pub fn set_receipt_status(&self, success: bool) {
        self.receipt_status.store(success, Ordering::SeqCst);
    }

    pub fn set_receipt_logs(&self, logs: Vec<Log>) {
        *self.receipt_logs.lock() = logs;
    }

    pub fn set_replacement(&self, reason: ReplacementReason, receipt: TxReceipt) {
        *self.replacement.lock() = Some((reason, receipt));
    }

    pub fn calls(&self, name: &'static str) -> usize {
        self.calls.get(name).map(|count| *count).unwrap_or(0)
    }

    pub fn approx_calls(&self) -> Vec<(u64, U256, U256)> {
        self.approx_calls.lock().clone()
    }

    pub fn last_redemption_iterations(&self) -> Option<u64> {
        *self.redemption_iterations.lock()
    }

    pub fn estimated(&self) -> Vec<TransactionRequest> {
        self.estimated.lock().clone()
    }

    pub fn submitted(&self) -> Vec<SubmittedTransaction> {
        self.submitted.lock().clone()
    }

    pub fn receipt_for(&self, hash: B256) -> TxReceipt {
        TxReceipt {
            transaction_hash: hash,
            block_number: self.state.read().block_number,
            from: self.sender.unwrap_or_default(),
            to: None,
            status: self.receipt_status.load(Ordering::SeqCst),
            gas_used: 100_000,
            logs: self.receipt_logs.lock().clone(),
        }
    }

    fn hit(&self, name: &'static str) -> ChainResult<()> {
        *self.calls.entry(name).or_insert(0) += 1;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ChainError::Other(format!("{name}: connection refused")));
        }
        Ok(())
    }

    fn neighbour(&self, id: Address, offset: isize) -> Address {
        let sorted = self.sorted.read();
        sorted
            .iter()
            .position(|(a, _)| *a == id)
            .and_then(|i| i.checked_add_signed(offset))
            .and_then(|i| sorted.get(i))
            .map(|(a, _)| *a)
            .unwrap_or(Address::ZERO)
    }
}

fn pair(values: (Decimal, Decimal)) -> CollateralDebt {
    CollateralDebt {
        collateral: values.0.raw(),
        debt: values.1.raw(),
    }
}

#[async_trait]
impl ProtocolReader for MockChain {
    async fn block_number(&self) -> ChainResult<u64> {
        self.hit("block_number")?;
        Ok(self.state.read().block_number)
    }

    async fn block_timestamp(&self, _block: BlockTag) -> ChainResult<u64> {
        self.hit("block_timestamp")?;
        Ok(self.state.read().block_timestamp)
    }

    async fn price(&self, _block: BlockTag) -> ChainResult<U256> {
        self.hit("price")?;
        Ok(self.state.read().price.raw())
    }

    async fn number_of_troves(&self, _block: BlockTag) -> ChainResult<u64> {
        self.hit("number_of_troves")?;
        Ok(self.sorted.read().len() as u64)
    }

    async fn total(&self, _block: BlockTag) -> ChainResult<CollateralDebt> {
        self.hit("total")?;
        Ok(pair(self.state.read().total))
    }

    async fn total_redistributed(&self, _block: BlockTag) -> ChainResult<CollateralDebt> {
        self.hit("total_redistributed")?;
        Ok(pair(self.state.read().total_redistributed))
    }

    async fn fee_params(&self, _block: BlockTag) -> ChainResult<FeeParams> {
        self.hit("fee_params")?;
        Ok(self.state.read().fee_params)
    }

    async fn trove(&self, owner: Address, _block: BlockTag) -> ChainResult<TroveRecord> {
        self.hit("trove")?;
        Ok(self.troves.get(&owner).map(|t| *t).unwrap_or_default())
    }

    async fn debt_token_balance(&self, owner: Address, _block: BlockTag) -> ChainResult<U256> {
        self.hit("debt_token_balance")?;
        Ok(self
            .debt_balances
            .get(&owner)
            .map(|b| b.raw())
            .unwrap_or_default())
    }

    async fn native_balance(&self, _owner: Address, _block: BlockTag) -> ChainResult<U256> {
        self.hit("native_balance")?;
        Ok(d("50").raw())
    }

    async fn collateral_surplus(&self, _owner: Address, _block: BlockTag) -> ChainResult<U256> {
        self.hit("collateral_surplus")?;
        Ok(U256::ZERO)
    }

    async fn last_trove(&self, _block: BlockTag) -> ChainResult<Address> {
        self.hit("last_trove")?;
        Ok(self
            .sorted
            .read()
            .last()
            .map(|(a, _)| *a)
            .unwrap_or(Address::ZERO))
    }

    async fn debt_in_stability_pool(&self, _block: BlockTag) -> ChainResult<U256> {
        self.hit("debt_in_stability_pool")?;
        Ok(self.state.read().debt_in_stability_pool.raw())
    }

    async fn stability_deposit(
        &self,
        owner: Address,
        _block: BlockTag,
    ) -> ChainResult<StabilityDepositRecord> {
        self.hit("stability_deposit")?;
        Ok(self.deposits.get(&owner).map(|r| *r).unwrap_or_default())
    }

    async fn frontend(&self, address: Address, _block: BlockTag) -> ChainResult<FrontendRecord> {
        self.hit("frontend")?;
        Ok(self.frontends.get(&address).map(|r| *r).unwrap_or_default())
    }

    async fn governance_token_balance(
        &self,
        _owner: Address,
        _block: BlockTag,
    ) -> ChainResult<U256> {
        self.hit("governance_token_balance")?;
        Ok(d("7").raw())
    }

    async fn total_staked(&self, _block: BlockTag) -> ChainResult<U256> {
        self.hit("total_staked")?;
        Ok(self.state.read().total_staked.raw())
    }

    async fn stake(&self, owner: Address, _block: BlockTag) -> ChainResult<StakeRecord> {
        self.hit("stake")?;
        Ok(self.stakes.get(&owner).map(|r| *r).unwrap_or_default())
    }

    async fn first_trove(&self) -> ChainResult<Address> {
        self.hit("first_trove")?;
        Ok(self
            .sorted
            .read()
            .first()
            .map(|(a, _)| *a)
            .unwrap_or(Address::ZERO))
    }

    async fn prev_trove(&self, id: Address) -> ChainResult<Address> {
        self.hit("prev_trove")?;
        Ok(self.neighbour(id, -1))
    }

    async fn next_trove(&self, id: Address) -> ChainResult<Address> {
        self.hit("next_trove")?;
        Ok(self.neighbour(id, 1))
    }

    async fn approx_hint(&self, nicr: U256, trials: u64, seed: U256) -> ChainResult<ApproxHint> {
        self.hit("approx_hint")?;
        let sorted = self.sorted.read();
        let mut rng = ChaCha8Rng::seed_from_u64(seed.as_limbs()[0]);

        let mut best = ApproxHint {
            hint: Address::ZERO,
            diff: U256::MAX,
            latest_random_seed: U256::ZERO,
        };
        if !sorted.is_empty() {
            for _ in 0..trials {
                let (id, key) = sorted[rng.gen_range(0..sorted.len())];
                let key = key.raw();
                let diff = if key > nicr { key - nicr } else { nicr - key };
                if diff < best.diff {
                    best.hint = id;
                    best.diff = diff;
                }
            }
        }
        best.latest_random_seed = U256::from(rng.gen::<u64>());

        self.approx_calls
            .lock()
            .push((trials, seed, best.latest_random_seed));
        Ok(best)
    }

    async fn find_insert_position(
        &self,
        nicr: U256,
        _prev: Address,
        _next: Address,
    ) -> ChainResult<(Address, Address)> {
        self.hit("find_insert_position")?;
        let sorted = self.sorted.read();
        let nicr = Decimal::from_raw(nicr);
        let position = sorted
            .iter()
            .position(|(_, key)| *key < nicr)
            .unwrap_or(sorted.len());

        let prev = position
            .checked_sub(1)
            .map(|i| sorted[i].0)
            .unwrap_or(Address::ZERO);
        let next = sorted.get(position).map(|(a, _)| *a).unwrap_or(Address::ZERO);
        Ok((prev, next))
    }

    async fn redemption_hints(
        &self,
        _amount: U256,
        _price: U256,
        max_iterations: u64,
    ) -> ChainResult<RedemptionHintsData> {
        self.hit("redemption_hints")?;
        *self.redemption_iterations.lock() = Some(max_iterations);
        Ok(self.state.read().redemption)
    }
}

#[async_trait]
impl TransactionSubmitter for MockChain {
    fn sender_address(&self) -> Option<Address> {
        self.sender
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> ChainResult<u64> {
        self.hit("estimate_gas")?;
        self.estimated.lock().push(tx.clone());
        Ok((self.gas_fn.read())(tx))
    }

    async fn submit(&self, tx: TransactionRequest) -> ChainResult<SubmittedTransaction> {
        self.hit("submit")?;
        let from = self.sender.ok_or(ChainError::NoSigner)?;
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);

        let submitted = SubmittedTransaction {
            hash: B256::left_padding_from(&(nonce + 1).to_be_bytes()),
            from,
            nonce,
            to: tx.to.and_then(|kind| kind.to().copied()),
            input: tx.input.input().cloned().unwrap_or_default(),
            value: tx.value.unwrap_or_default(),
            submitted_at_block: self.state.read().block_number,
        };
        self.submitted.lock().push(submitted.clone());
        Ok(submitted)
    }

    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>> {
        self.hit("receipt")?;
        if !self.mined.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.receipt_for(hash)))
    }

    async fn wait_for_inclusion(
        &self,
        tx: &SubmittedTransaction,
        _confirmations: u64,
    ) -> ChainResult<InclusionOutcome> {
        self.hit("wait_for_inclusion")?;
        if let Some((reason, receipt)) = self.replacement.lock().clone() {
            return Ok(InclusionOutcome::Replaced { reason, receipt });
        }
        Ok(InclusionOutcome::Mined(self.receipt_for(tx.hash)))
    }
}
