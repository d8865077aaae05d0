//! Transaction submission and inclusion tracking.
//! Uses Alloy providers for all RPC interactions.
//!
//! - Nonces are handed out locally so every submission knows its nonce up front
//! - Gas pricing is either left to the provider fillers or fixed from config
//! - Waiting polls for the receipt and, once the account nonce moves past ours,
//!   searches recent blocks for the transaction that took its place

use alloy::consensus::Transaction as _;
use alloy::eips::BlockId;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::connection::{
    InclusionOutcome, ReplacementReason, SubmittedTransaction, TransactionSubmitter, TxReceipt,
};
use crate::error::{ChainError, ChainResult};

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Local nonce counter for the signing account.
#[derive(Debug)]
pub struct NonceManager {
    next: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            next: AtomicU64::new(initial_nonce),
        }
    }

    /// Take the next nonce.
    #[inline]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Overwrite with the chain's pending count (after a failed submission).
    pub fn reset(&self, chain_nonce: u64) {
        self.next.store(chain_nonce, Ordering::SeqCst);
    }
}

/// How fee fields are set on outgoing transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasPricing {
    /// Let the provider's gas filler price the transaction
    #[default]
    Auto,
    /// Fixed legacy gas price
    Legacy { gas_price: u128 },
    /// Fixed EIP-1559 fees
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasPricing {
    /// Apply to a transaction unless the caller already priced it.
    pub fn apply(&self, tx: &mut TransactionRequest) {
        if tx.gas_price.is_some() || tx.max_fee_per_gas.is_some() {
            return;
        }
        match *self {
            Self::Auto => {}
            Self::Legacy { gas_price } => tx.set_gas_price(gas_price),
            Self::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                tx.set_max_fee_per_gas(max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Legacy { .. } => "legacy",
            Self::Eip1559 { .. } => "eip-1559",
        }
    }
}

/// Builder for [`AlloySubmitter`].
pub struct AlloySubmitterBuilder {
    rpc_url: String,
    chain_id: u64,
    gas_pricing: GasPricing,
    poll_interval: Duration,
}

impl AlloySubmitterBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            gas_pricing: GasPricing::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn gas_pricing(mut self, pricing: GasPricing) -> Self {
        self.gas_pricing = pricing;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build the submitter. Without a key it can still estimate gas and
    /// track receipts, but `submit` fails with [`ChainError::NoSigner`].
    pub async fn build(self, private_key: Option<&str>) -> ChainResult<AlloySubmitter> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidUrl(format!("{}: {e}", self.rpc_url)))?;

        let (provider, signer) = match private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key
                    .trim_start_matches("0x")
                    .parse()
                    .map_err(|e| ChainError::Signer(format!("{e}")))?;
                let address = signer.address();
                let wallet = EthereumWallet::from(signer);
                let provider = ProviderBuilder::new().wallet(wallet).on_http(url).erased();

                let initial_nonce = provider.get_transaction_count(address).pending().await?;
                (provider, Some((address, NonceManager::new(initial_nonce))))
            }
            None => (ProviderBuilder::new().on_http(url).erased(), None),
        };

        info!(
            address = ?signer.as_ref().map(|(a, _)| *a),
            chain_id = self.chain_id,
            initial_nonce = ?signer.as_ref().map(|(_, n)| n.current()),
            gas_pricing = self.gas_pricing.name(),
            "Transaction submitter initialized"
        );

        Ok(AlloySubmitter {
            rpc_url: self.rpc_url,
            provider,
            signer,
            chain_id: self.chain_id,
            gas_pricing: self.gas_pricing,
            poll_interval: self.poll_interval,
        })
    }
}

/// Submits transactions and tracks them to inclusion.
pub struct AlloySubmitter {
    rpc_url: String,
    provider: DynProvider,
    /// Signing address and its nonce counter
    signer: Option<(Address, NonceManager)>,
    chain_id: u64,
    gas_pricing: GasPricing,
    poll_interval: Duration,
}

impl AlloySubmitter {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Next nonce the submitter will use.
    pub fn current_nonce(&self) -> Option<u64> {
        self.signer.as_ref().map(|(_, nonces)| nonces.current())
    }

    /// Re-read the pending nonce from chain.
    pub async fn sync_nonce(&self) {
        let Some((address, nonces)) = &self.signer else {
            return;
        };
        match self.provider.get_transaction_count(*address).pending().await {
            Ok(chain_nonce) => {
                nonces.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "Failed to sync nonce from chain"),
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Block until `mined_at` has `confirmations` blocks including itself.
    async fn await_confirmations(
        &self,
        mined_at: u64,
        confirmations: u64,
        ticker: &mut Interval,
    ) -> ChainResult<()> {
        if confirmations <= 1 {
            return Ok(());
        }
        loop {
            let latest = self.provider.get_block_number().await?;
            if latest + 1 >= mined_at + confirmations {
                return Ok(());
            }
            ticker.tick().await;
        }
    }

    /// Scan blocks from `scan_from` to the head for a transaction reusing
    /// our sender and nonce. Advances `scan_from` past scanned blocks.
    async fn find_replacement(
        &self,
        tx: &SubmittedTransaction,
        scan_from: &mut u64,
    ) -> ChainResult<Option<InclusionOutcome>> {
        let latest = self.provider.get_block_number().await?;

        while *scan_from <= latest {
            let receipts = self
                .provider
                .get_block_receipts(BlockId::number(*scan_from))
                .await?
                .unwrap_or_default();

            for receipt in receipts
                .into_iter()
                .filter(|r| r.from == tx.from && r.transaction_hash != tx.hash)
            {
                let Some(candidate) = self
                    .provider
                    .get_transaction_by_hash(receipt.transaction_hash)
                    .await?
                else {
                    continue;
                };
                if candidate.nonce() != tx.nonce {
                    continue;
                }

                let reason = ReplacementReason::classify(
                    tx,
                    candidate.to(),
                    candidate.input(),
                    candidate.value(),
                );
                info!(
                    original = %tx.hash,
                    replacement = %receipt.transaction_hash,
                    reason = reason.as_str(),
                    "Transaction replaced"
                );
                return Ok(Some(InclusionOutcome::Replaced {
                    reason,
                    receipt: receipt.into(),
                }));
            }

            *scan_from += 1;
        }

        Ok(None)
    }
}

#[async_trait]
impl TransactionSubmitter for AlloySubmitter {
    fn sender_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|(address, _)| *address)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> ChainResult<u64> {
        let mut tx = tx.clone();
        if tx.from.is_none() {
            if let Some(from) = self.sender_address() {
                tx.set_from(from);
            }
        }
        Ok(self.provider.estimate_gas(tx).await?)
    }

    #[instrument(skip(self, tx))]
    async fn submit(&self, mut tx: TransactionRequest) -> ChainResult<SubmittedTransaction> {
        let (from, nonces) = self.signer.as_ref().ok_or(ChainError::NoSigner)?;
        let start = Instant::now();

        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => nonces.next(),
        };
        tx.set_from(*from);
        tx.set_nonce(nonce);
        tx.set_chain_id(self.chain_id);
        self.gas_pricing.apply(&mut tx);

        let to = tx.to.and_then(|kind| kind.to().copied());
        let input = tx.input.input().cloned().unwrap_or_default();
        let value = tx.value.unwrap_or_default();
        let submitted_at_block = self.provider.get_block_number().await?;

        let pending = match self.provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(nonce = nonce, error = %e, "Submission failed, syncing nonce");
                self.sync_nonce().await;
                return Err(e.into());
            }
        };
        let hash = *pending.tx_hash();

        info!(
            tx_hash = %hash,
            nonce = nonce,
            block = submitted_at_block,
            submit_ms = start.elapsed().as_millis(),
            "Transaction submitted"
        );

        Ok(SubmittedTransaction {
            hash,
            from: *from,
            nonce,
            to,
            input,
            value,
            submitted_at_block,
        })
    }

    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>> {
        Ok(self
            .provider
            .get_transaction_receipt(hash)
            .await?
            .map(TxReceipt::from))
    }

    #[instrument(skip(self, tx), fields(tx_hash = %tx.hash))]
    async fn wait_for_inclusion(
        &self,
        tx: &SubmittedTransaction,
        confirmations: u64,
    ) -> ChainResult<InclusionOutcome> {
        let start = Instant::now();
        let mut ticker = self.ticker();
        let mut scan_from = tx.submitted_at_block;

        loop {
            ticker.tick().await;

            if let Some(receipt) = self.provider.get_transaction_receipt(tx.hash).await? {
                let receipt = TxReceipt::from(receipt);
                self.await_confirmations(receipt.block_number, confirmations, &mut ticker)
                    .await?;
                info!(
                    block = receipt.block_number,
                    status = receipt.status,
                    gas_used = receipt.gas_used,
                    wait_ms = start.elapsed().as_millis(),
                    "Transaction mined"
                );
                return Ok(InclusionOutcome::Mined(receipt));
            }

            let mined_nonce = self.provider.get_transaction_count(tx.from).await?;
            if mined_nonce > tx.nonce {
                if let Some(outcome) = self.find_replacement(tx, &mut scan_from).await? {
                    if let InclusionOutcome::Replaced { receipt, .. } = &outcome {
                        self.await_confirmations(receipt.block_number, confirmations, &mut ticker)
                            .await?;
                    }
                    return Ok(outcome);
                }
            }
        }
    }
}

impl std::fmt::Debug for AlloySubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloySubmitter")
            .field("address", &self.sender_address())
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("gas_pricing", &self.gas_pricing.name())
            .finish_non_exhaustive()
    }
}
