//! State computed from a snapshot's base state and the wall clock, and the
//! per-field difference between two snapshots.

use chrono::{DateTime, Utc};
use trove_chain::FeeParams;

use super::BaseState;
use crate::decimal::Decimal;
use crate::fees::Fees;
use crate::stability::{FrontendStatus, Stake, StabilityDeposit};
use crate::trove::{Trove, TroveWithPendingRedistribution, UserTrove};

/// Values derived from [`BaseState`].
///
/// Rates are evaluated at a point in time rather than at the snapshot's
/// block, so they drift as the base rate decays even when no block arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedState {
    /// Fee calculator with recovery mode resolved from the system ratio
    pub fees: Fees,
    pub borrowing_rate: Decimal,
    /// Rate for a negligible redemption
    pub redemption_rate: Decimal,
    /// Whether the riskiest trove is liquidatable at the current price
    pub have_undercollateralized_troves: bool,
}

impl DerivedState {
    pub fn compute(base: &BaseState, block_timestamp: u64, now: DateTime<Utc>) -> Self {
        let recovery_mode = base.total.collateral_ratio_is_below_critical(base.price);
        let fees = Fees::from_params(&base.fee_params, block_timestamp, recovery_mode);
        let riskiest = base
            .riskiest_trove_before_redistribution
            .apply_redistribution(&base.total_redistributed);

        Self {
            fees,
            borrowing_rate: fees.borrowing_rate(Some(now)),
            redemption_rate: fees.redemption_rate(Decimal::ZERO, Some(now)),
            have_undercollateralized_troves: riskiest
                .trove
                .collateral_ratio_is_below_minimum(base.price),
        }
    }
}

/// Fields that differ between the old and the new snapshot, holding the
/// new value. Everything is `Some` for the first snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    pub block_tag: Option<u64>,
    pub block_timestamp: Option<u64>,

    pub price: Option<Decimal>,
    pub number_of_troves: Option<u64>,
    pub total: Option<Trove>,
    pub total_redistributed: Option<Trove>,
    pub fee_params: Option<FeeParams>,
    pub riskiest_trove_before_redistribution: Option<TroveWithPendingRedistribution>,
    pub debt_in_stability_pool: Option<Decimal>,
    pub total_staked: Option<Decimal>,
    pub frontend: Option<FrontendStatus>,

    pub trove_before_redistribution: Option<TroveWithPendingRedistribution>,
    pub trove: Option<UserTrove>,
    pub debt_token_balance: Option<Decimal>,
    pub native_balance: Option<Decimal>,
    pub collateral_surplus_balance: Option<Decimal>,
    pub governance_token_balance: Option<Decimal>,
    pub stability_deposit: Option<StabilityDeposit>,
    pub stake: Option<Stake>,
    pub own_frontend: Option<FrontendStatus>,

    pub fees: Option<Fees>,
    pub borrowing_rate: Option<Decimal>,
    pub redemption_rate: Option<Decimal>,
    pub have_undercollateralized_troves: Option<bool>,
}

fn changed<T: PartialEq + Clone>(old: Option<&T>, new: &T) -> Option<T> {
    match old {
        Some(old) if old == new => None,
        _ => Some(new.clone()),
    }
}

impl StateChange {
    pub(crate) fn between<E>(old: Option<&super::Snapshot<E>>, new: &super::Snapshot<E>) -> Self {
        let base = old.map(|s| &s.base);
        let derived = old.map(|s| &s.derived);

        Self {
            block_tag: changed(old.map(|s| &s.block_tag), &new.block_tag),
            block_timestamp: changed(old.map(|s| &s.block_timestamp), &new.block_timestamp),

            price: changed(base.map(|b| &b.price), &new.base.price),
            number_of_troves: changed(base.map(|b| &b.number_of_troves), &new.base.number_of_troves),
            total: changed(base.map(|b| &b.total), &new.base.total),
            total_redistributed: changed(
                base.map(|b| &b.total_redistributed),
                &new.base.total_redistributed,
            ),
            fee_params: changed(base.map(|b| &b.fee_params), &new.base.fee_params),
            riskiest_trove_before_redistribution: changed(
                base.map(|b| &b.riskiest_trove_before_redistribution),
                &new.base.riskiest_trove_before_redistribution,
            ),
            debt_in_stability_pool: changed(
                base.map(|b| &b.debt_in_stability_pool),
                &new.base.debt_in_stability_pool,
            ),
            total_staked: changed(base.map(|b| &b.total_staked), &new.base.total_staked),
            frontend: changed(base.map(|b| &b.frontend), &new.base.frontend),

            trove_before_redistribution: changed(
                base.map(|b| &b.trove_before_redistribution),
                &new.base.trove_before_redistribution,
            ),
            trove: changed(base.map(|b| &b.trove), &new.base.trove),
            debt_token_balance: changed(
                base.map(|b| &b.debt_token_balance),
                &new.base.debt_token_balance,
            ),
            native_balance: changed(base.map(|b| &b.native_balance), &new.base.native_balance),
            collateral_surplus_balance: changed(
                base.map(|b| &b.collateral_surplus_balance),
                &new.base.collateral_surplus_balance,
            ),
            governance_token_balance: changed(
                base.map(|b| &b.governance_token_balance),
                &new.base.governance_token_balance,
            ),
            stability_deposit: changed(
                base.map(|b| &b.stability_deposit),
                &new.base.stability_deposit,
            ),
            stake: changed(base.map(|b| &b.stake), &new.base.stake),
            own_frontend: changed(base.map(|b| &b.own_frontend), &new.base.own_frontend),

            fees: changed(derived.map(|d| &d.fees), &new.derived.fees),
            borrowing_rate: changed(derived.map(|d| &d.borrowing_rate), &new.derived.borrowing_rate),
            redemption_rate: changed(
                derived.map(|d| &d.redemption_rate),
                &new.derived.redemption_rate,
            ),
            have_undercollateralized_troves: changed(
                derived.map(|d| &d.have_undercollateralized_troves),
                &new.derived.have_undercollateralized_troves,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
