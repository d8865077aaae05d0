//! Transaction lifecycle: populated, sent, mined.
//!
//! A [`PopulatedTransaction`] is a fully built request carrying the parser
//! that turns its eventual receipt into typed details. Sending it yields a
//! [`SentTransaction`] that can be polled or awaited. Details of a
//! successful receipt are parsed once, on first access.

use std::fmt;
use std::sync::{Arc, OnceLock};

use alloy::primitives::B256;
use alloy::rpc::types::TransactionRequest;
use tracing::{info, warn};
use trove_chain::{
    InclusionOutcome, ReplacementReason, SubmittedTransaction, TransactionSubmitter, TxReceipt,
};

use crate::error::{ClientError, ClientResult};

/// Turns a successful receipt into operation details.
pub type ReceiptParser<D> = Arc<dyn Fn(&TxReceipt) -> D + Send + Sync>;

/// A built, unsigned transaction.
pub struct PopulatedTransaction<D> {
    raw: TransactionRequest,
    parser: ReceiptParser<D>,
    gas_headroom: Option<u64>,
    submitter: Arc<dyn TransactionSubmitter>,
    confirmations: u64,
}

impl<D> PopulatedTransaction<D> {
    pub fn new(
        raw: TransactionRequest,
        parser: ReceiptParser<D>,
        gas_headroom: Option<u64>,
        submitter: Arc<dyn TransactionSubmitter>,
        confirmations: u64,
    ) -> Self {
        Self {
            raw,
            parser,
            gas_headroom,
            submitter,
            confirmations,
        }
    }

    pub fn raw(&self) -> &TransactionRequest {
        &self.raw
    }

    /// Gas added on top of the current estimate, if estimated here.
    pub fn gas_headroom(&self) -> Option<u64> {
        self.gas_headroom
    }

    pub async fn send(self) -> ClientResult<SentTransaction<D>> {
        let submitted = self.submitter.submit(self.raw).await?;
        info!(hash = %submitted.hash, nonce = submitted.nonce, "Transaction sent");

        Ok(SentTransaction {
            submitted,
            parser: self.parser,
            submitter: self.submitter,
            confirmations: self.confirmations,
        })
    }
}

impl<D> fmt::Debug for PopulatedTransaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulatedTransaction")
            .field("raw", &self.raw)
            .field("gas_headroom", &self.gas_headroom)
            .finish_non_exhaustive()
    }
}

/// A submitted transaction.
pub struct SentTransaction<D> {
    submitted: SubmittedTransaction,
    parser: ReceiptParser<D>,
    submitter: Arc<dyn TransactionSubmitter>,
    confirmations: u64,
}

impl<D> SentTransaction<D> {
    pub fn hash(&self) -> B256 {
        self.submitted.hash
    }

    pub fn submitted(&self) -> &SubmittedTransaction {
        &self.submitted
    }

    /// Current receipt state, without waiting.
    pub async fn get_receipt(&self) -> ClientResult<TransactionReceipt<D>> {
        match self.submitter.receipt(self.submitted.hash).await? {
            None => Ok(TransactionReceipt::Pending),
            Some(receipt) => Ok(self.classify(receipt).into()),
        }
    }

    /// Wait until mined with the configured confirmations. A replacement
    /// that is not a plain repricing fails with
    /// [`ClientError::TransactionCancelled`].
    pub async fn wait_for_receipt(&self) -> ClientResult<MinedReceipt<D>> {
        let outcome = self
            .submitter
            .wait_for_inclusion(&self.submitted, self.confirmations)
            .await?;

        match outcome {
            InclusionOutcome::Mined(receipt) => Ok(self.classify(receipt)),
            InclusionOutcome::Replaced {
                reason: ReplacementReason::Repriced,
                receipt,
            } => {
                info!(
                    original = %self.submitted.hash,
                    replacement = %receipt.transaction_hash,
                    "Transaction repriced"
                );
                Ok(self.classify(receipt))
            }
            InclusionOutcome::Replaced { reason, receipt } => {
                warn!(
                    original = %self.submitted.hash,
                    replacement = %receipt.transaction_hash,
                    reason = reason.as_str(),
                    "Transaction superseded"
                );
                Err(ClientError::TransactionCancelled {
                    reason,
                    receipt: Box::new(receipt),
                })
            }
        }
    }

    fn classify(&self, receipt: TxReceipt) -> MinedReceipt<D> {
        if receipt.status {
            MinedReceipt::Succeeded(SucceededReceipt::new(receipt, self.parser.clone()))
        } else {
            MinedReceipt::Failed(FailedReceipt { raw: receipt })
        }
    }
}

impl<D> fmt::Debug for SentTransaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentTransaction")
            .field("submitted", &self.submitted)
            .field("confirmations", &self.confirmations)
            .finish_non_exhaustive()
    }
}

/// Receipt state of a sent transaction.
#[derive(Debug)]
pub enum TransactionReceipt<D> {
    Pending,
    Succeeded(SucceededReceipt<D>),
    Failed(FailedReceipt),
}

impl<D> TransactionReceipt<D> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Receipt of a mined transaction.
#[derive(Debug)]
pub enum MinedReceipt<D> {
    Succeeded(SucceededReceipt<D>),
    Failed(FailedReceipt),
}

impl<D> MinedReceipt<D> {
    pub fn raw(&self) -> &TxReceipt {
        match self {
            Self::Succeeded(receipt) => receipt.raw(),
            Self::Failed(receipt) => receipt.raw(),
        }
    }
}

impl<D> From<MinedReceipt<D>> for TransactionReceipt<D> {
    fn from(receipt: MinedReceipt<D>) -> Self {
        match receipt {
            MinedReceipt::Succeeded(receipt) => Self::Succeeded(receipt),
            MinedReceipt::Failed(receipt) => Self::Failed(receipt),
        }
    }
}

/// Successful receipt; details are parsed on first access.
pub struct SucceededReceipt<D> {
    raw: TxReceipt,
    parser: ReceiptParser<D>,
    details: OnceLock<D>,
}

impl<D> SucceededReceipt<D> {
    fn new(raw: TxReceipt, parser: ReceiptParser<D>) -> Self {
        Self {
            raw,
            parser,
            details: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &TxReceipt {
        &self.raw
    }

    pub fn details(&self) -> &D {
        self.details.get_or_init(|| (self.parser)(&self.raw))
    }
}

impl<D: fmt::Debug> fmt::Debug for SucceededReceipt<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SucceededReceipt")
            .field("raw", &self.raw)
            .field("details", &self.details.get())
            .finish()
    }
}

/// Reverted receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedReceipt {
    raw: TxReceipt,
}

impl FailedReceipt {
    pub fn raw(&self) -> &TxReceipt {
        &self.raw
    }

    pub fn into_raw(self) -> TxReceipt {
        self.raw
    }
}
