//! Insertion hints for the sorted trove list.
//!
//! The list is kept ordered by nominal collateral ratio on chain; every
//! operation that moves a trove needs a (prev, next) pair close to the new
//! position or the contract walks the list and burns gas.
//!
//! The search runs in two steps:
//! 1. `getApproxHint` samples random troves and returns the closest one.
//!    Trials are split into batches, each seeded with the previous batch's
//!    output seed, so public RPC gas caps are never hit.
//! 2. `findInsertPosition` walks from the best candidate to the exact slot.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use smallvec::SmallVec;
use tracing::{debug, trace};
use trove_chain::{ApproxHint, BlockTag, ProtocolReader};

use crate::config::HintsConfig;
use crate::constants::MINIMUM_NET_DEBT;
use crate::decimal::Decimal;
use crate::error::{ClientResult, UserInputError};
use crate::trove::Hintable;

/// Hints for a redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionHints {
    /// First trove to redeem against
    pub first_hint: Address,
    pub upper_partial_hint: Address,
    pub lower_partial_hint: Address,
    /// Key of the trove left partially redeemed; zero if none
    pub partial_nicr: Decimal,
    /// Largest amount redeemable without leaving a trove below minimum debt
    pub truncated_amount: Decimal,
}

/// Finds (prev, next) insertion hints and redemption hints.
pub struct HintFinder {
    reader: Arc<dyn ProtocolReader>,
    config: HintsConfig,
    rng: Mutex<ChaCha8Rng>,
}

impl HintFinder {
    pub fn new(reader: Arc<dyn ProtocolReader>, config: HintsConfig) -> Self {
        Self {
            reader,
            config,
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }

    /// Fixed seed source, for reproducible searches.
    pub fn with_seed(reader: Arc<dyn ProtocolReader>, config: HintsConfig, seed: u64) -> Self {
        Self {
            reader,
            config,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Hints for inserting `trove`.
    ///
    /// `own` is the address the trove is being reinserted for, if it is
    /// already in the list; the returned hints never point at it.
    pub async fn find_hints(
        &self,
        trove: &impl Hintable,
        own: Option<Address>,
    ) -> ClientResult<(Address, Address)> {
        // Checked before any remote call
        let nicr = trove.hint_key()?;
        self.find_hints_for_ratio(nicr, own).await
    }

    pub async fn find_hints_for_ratio(
        &self,
        nicr: Decimal,
        own: Option<Address>,
    ) -> ClientResult<(Address, Address)> {
        let size = self.reader.number_of_troves(BlockTag::Latest).await?;
        self.find_hints_with_size(nicr, own, size).await
    }

    /// Same as [`find_hints_for_ratio`](Self::find_hints_for_ratio) with a
    /// list size the caller already knows.
    pub async fn find_hints_with_size(
        &self,
        nicr: Decimal,
        own: Option<Address>,
        number_of_troves: u64,
    ) -> ClientResult<(Address, Address)> {
        if number_of_troves == 0 {
            return Ok((Address::ZERO, Address::ZERO));
        }

        if nicr.is_infinite() {
            let first = self.reader.first_trove().await?;
            return Ok((Address::ZERO, first));
        }

        let batches = self.trial_batches(number_of_troves);
        let mut seed = self.random_seed();
        let mut candidates: SmallVec<[ApproxHint; 4]> = SmallVec::new();

        for trials in &batches {
            let approx = self.reader.approx_hint(nicr.raw(), *trials, seed).await?;
            trace!(trials, hint = %approx.hint, diff = %approx.diff, "Approx hint batch");
            seed = approx.latest_random_seed;
            candidates.push(approx);
        }

        // First minimum wins on ties
        let hint = candidates
            .iter()
            .min_by_key(|candidate| candidate.diff)
            .map(|candidate| candidate.hint)
            .unwrap_or(Address::ZERO);

        let (mut prev, mut next) = self
            .reader
            .find_insert_position(nicr.raw(), hint, hint)
            .await?;

        if let Some(own) = own {
            if prev == own {
                prev = self.reader.prev_trove(prev).await?;
            } else if next == own {
                next = self.reader.next_trove(next).await?;
            }
        }

        // The sentinel is only a valid hint for an empty list
        if prev == Address::ZERO {
            prev = next;
        } else if next == Address::ZERO {
            next = prev;
        }

        debug!(
            nicr = %nicr,
            number_of_troves,
            batches = batches.len(),
            %prev,
            %next,
            "Found insertion hints"
        );

        Ok((prev, next))
    }

    /// Hints for redeeming `amount` at `price`.
    ///
    /// Fails if not even one trove can be redeemed against; the requested
    /// amount must then be raised.
    pub async fn find_redemption_hints(
        &self,
        amount: Decimal,
        price: Decimal,
    ) -> ClientResult<RedemptionHints> {
        let data = self
            .reader
            .redemption_hints(amount.raw(), price.raw(), self.config.redemption_max_iterations)
            .await?;

        let truncated_amount = Decimal::from_raw(data.truncated_amount);
        if truncated_amount.is_zero() {
            return Err(UserInputError::RedemptionAmountTooLow {
                minimum: MINIMUM_NET_DEBT,
            }
            .into());
        }

        let partial_nicr = Decimal::from_raw(data.partial_nicr);
        let (upper_partial_hint, lower_partial_hint) = if partial_nicr.is_zero() {
            (Address::ZERO, Address::ZERO)
        } else {
            self.find_hints_for_ratio(partial_nicr, None).await?
        };

        debug!(
            amount = %amount,
            truncated = %truncated_amount,
            first = %data.first_hint,
            "Found redemption hints"
        );

        Ok(RedemptionHints {
            first_hint: data.first_hint,
            upper_partial_hint,
            lower_partial_hint,
            partial_nicr,
            truncated_amount,
        })
    }

    /// Split ceil(factor * sqrt(n)) trials into batches no larger than the
    /// per-call cap.
    fn trial_batches(&self, number_of_troves: u64) -> SmallVec<[u64; 4]> {
        let total = (self.config.trials_factor * (number_of_troves as f64).sqrt()).ceil() as u64;
        let total = total.max(1);
        let cap = self.config.max_trials_per_call.max(1);

        let mut batches = SmallVec::new();
        let mut remaining = total;
        while remaining > 0 {
            let trials = remaining.min(cap);
            batches.push(trials);
            remaining -= trials;
        }
        batches
    }

    fn random_seed(&self) -> U256 {
        U256::from(self.rng.lock().gen::<u64>())
    }
}

impl std::fmt::Debug for HintFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintFinder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
