//! Trove data structures and the change arithmetic used to predict the
//! outcome of borrower operations.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use trove_chain::TroveRecord;

use crate::constants::{
    CRITICAL_COLLATERAL_RATIO, LIQUIDATION_RESERVE, MINIMUM_BORROWING_RATE,
    MINIMUM_COLLATERAL_RATIO, NOMINAL_COLLATERAL_RATIO_PRECISION,
};
use crate::decimal::Decimal;
use crate::error::UserInputError;

/// Collateral and debt of a trove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trove {
    pub collateral: Decimal,
    pub debt: Decimal,
}

impl Trove {
    pub const EMPTY: Self = Self {
        collateral: Decimal::ZERO,
        debt: Decimal::ZERO,
    };

    pub fn new(collateral: Decimal, debt: Decimal) -> Self {
        Self { collateral, debt }
    }

    pub fn is_empty(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }

    /// Debt minus the liquidation reserve.
    pub fn net_debt(&self) -> Result<Decimal, UserInputError> {
        if self.debt < LIQUIDATION_RESERVE {
            return Err(UserInputError::NetDebtBelowReserve { debt: self.debt });
        }
        Ok(self.debt - LIQUIDATION_RESERVE)
    }

    /// Ordering key in the sorted list; infinite for a debt-free trove.
    pub fn nominal_collateral_ratio(&self) -> Decimal {
        self.collateral
            .mul_div(NOMINAL_COLLATERAL_RATIO_PRECISION, self.debt)
    }

    pub fn collateral_ratio(&self, price: Decimal) -> Decimal {
        self.collateral.mul_div(price, self.debt)
    }

    pub fn collateral_ratio_is_below_minimum(&self, price: Decimal) -> bool {
        self.collateral_ratio(price) < MINIMUM_COLLATERAL_RATIO
    }

    pub fn collateral_ratio_is_below_critical(&self, price: Decimal) -> bool {
        self.collateral_ratio(price) < CRITICAL_COLLATERAL_RATIO
    }

    pub fn is_openable_in_recovery_mode(&self, price: Decimal) -> bool {
        self.collateral_ratio(price) >= CRITICAL_COLLATERAL_RATIO
    }

    pub fn add(&self, that: &Trove) -> Trove {
        Trove::new(self.collateral + that.collateral, self.debt + that.debt)
    }

    pub fn add_collateral(&self, collateral: Decimal) -> Trove {
        Trove::new(self.collateral + collateral, self.debt)
    }

    pub fn add_debt(&self, debt: Decimal) -> Trove {
        Trove::new(self.collateral, self.debt + debt)
    }

    /// Component-wise subtraction, clamped at zero.
    pub fn subtract(&self, that: &Trove) -> Trove {
        Trove::new(self.collateral - that.collateral, self.debt - that.debt)
    }

    pub fn subtract_collateral(&self, collateral: Decimal) -> Trove {
        Trove::new(self.collateral - collateral, self.debt)
    }

    pub fn subtract_debt(&self, debt: Decimal) -> Trove {
        Trove::new(self.collateral, self.debt - debt)
    }

    pub fn multiply(&self, multiplier: Decimal) -> Trove {
        Trove::new(self.collateral * multiplier, self.debt * multiplier)
    }

    pub fn set_collateral(&self, collateral: Decimal) -> Trove {
        Trove::new(collateral, self.debt)
    }

    pub fn set_debt(&self, debt: Decimal) -> Trove {
        Trove::new(self.collateral, debt)
    }

    fn debt_change(&self, that: &Trove, borrowing_rate: Decimal) -> DebtChange {
        if that.debt > self.debt {
            DebtChange::Borrow(unapply_fee(borrowing_rate, that.debt - self.debt))
        } else {
            DebtChange::Repay(self.debt - that.debt)
        }
    }

    fn collateral_change(&self, that: &Trove) -> CollateralChange {
        if that.collateral > self.collateral {
            CollateralChange::Deposit(that.collateral - self.collateral)
        } else {
            CollateralChange::Withdraw(self.collateral - that.collateral)
        }
    }

    /// Change that turns `self` into `that`, or `None` if they are equal.
    pub fn what_changed(
        &self,
        that: &Trove,
        borrowing_rate: Decimal,
    ) -> Result<Option<TroveChange>, UserInputError> {
        if self == that {
            return Ok(None);
        }

        if self.is_empty() {
            if that.debt < LIQUIDATION_RESERVE {
                return Ok(Some(TroveChange::InvalidCreation {
                    invalid_trove: *that,
                    error: TroveCreationError::MissingLiquidationReserve,
                }));
            }
            return Ok(Some(TroveChange::Creation(TroveCreationParams {
                deposit_collateral: that.collateral,
                borrow_debt: unapply_fee(borrowing_rate, that.net_debt()?),
            })));
        }

        if that.is_empty() {
            let net_debt = self.net_debt()?;
            return Ok(Some(TroveChange::Closure(TroveClosureParams {
                withdraw_collateral: self.collateral,
                repay_debt: (!net_debt.is_zero()).then_some(net_debt),
            })));
        }

        let change = if self.collateral == that.collateral {
            TroveChange::Adjustment {
                params: TroveAdjustmentParams {
                    collateral: None,
                    debt: Some(self.debt_change(that, borrowing_rate)),
                },
                set_to_zero: that.debt.is_zero().then_some(SetToZero::Debt),
            }
        } else if self.debt == that.debt {
            TroveChange::Adjustment {
                params: TroveAdjustmentParams {
                    collateral: Some(self.collateral_change(that)),
                    debt: None,
                },
                set_to_zero: that.collateral.is_zero().then_some(SetToZero::Collateral),
            }
        } else {
            let set_to_zero = if that.debt.is_zero() {
                Some(SetToZero::Debt)
            } else if that.collateral.is_zero() {
                Some(SetToZero::Collateral)
            } else {
                None
            };
            TroveChange::Adjustment {
                params: TroveAdjustmentParams {
                    collateral: Some(self.collateral_change(that)),
                    debt: Some(self.debt_change(that, borrowing_rate)),
                },
                set_to_zero,
            }
        };

        Ok(Some(change))
    }

    /// Apply a change computed by [`Trove::what_changed`] or built by hand.
    pub fn apply(
        &self,
        change: Option<&TroveChange>,
        borrowing_rate: Decimal,
    ) -> Result<Trove, UserInputError> {
        let Some(change) = change else {
            return Ok(*self);
        };

        match change {
            TroveChange::InvalidCreation { invalid_trove, .. } => {
                self.ensure_empty()?;
                Ok(*invalid_trove)
            }
            TroveChange::Creation(params) => {
                self.ensure_empty()?;
                Ok(Trove::new(
                    params.deposit_collateral,
                    LIQUIDATION_RESERVE + apply_fee(borrowing_rate, params.borrow_debt),
                ))
            }
            TroveChange::Closure(_) => {
                if self.is_empty() {
                    return Err(UserInputError::InvalidTroveParams(
                        "can't close empty trove".into(),
                    ));
                }
                Ok(Trove::EMPTY)
            }
            TroveChange::Adjustment {
                params,
                set_to_zero,
            } => Ok(self.apply_adjustment(params, *set_to_zero, borrowing_rate)),
        }
    }

    fn ensure_empty(&self) -> Result<(), UserInputError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(UserInputError::InvalidTroveParams(
                "can't create onto existing trove".into(),
            ))
        }
    }

    fn apply_adjustment(
        &self,
        params: &TroveAdjustmentParams,
        set_to_zero: Option<SetToZero>,
        borrowing_rate: Decimal,
    ) -> Trove {
        let (collateral_increase, collateral_decrease) = match params.collateral {
            Some(CollateralChange::Deposit(amount)) => (amount, Decimal::ZERO),
            Some(CollateralChange::Withdraw(amount)) => (Decimal::ZERO, amount),
            None => (Decimal::ZERO, Decimal::ZERO),
        };
        let (debt_increase, debt_decrease) = match params.debt {
            Some(DebtChange::Borrow(amount)) => (apply_fee(borrowing_rate, amount), Decimal::ZERO),
            Some(DebtChange::Repay(amount)) => (Decimal::ZERO, amount),
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        match set_to_zero {
            Some(SetToZero::Collateral) => self
                .set_collateral(Decimal::ZERO)
                .add_debt(debt_increase)
                .subtract_debt(debt_decrease),
            Some(SetToZero::Debt) => self
                .set_debt(Decimal::ZERO)
                .add_collateral(collateral_increase)
                .subtract_collateral(collateral_decrease),
            None => self
                .add(&Trove::new(collateral_increase, debt_increase))
                .subtract(&Trove::new(collateral_decrease, debt_decrease)),
        }
    }

    /// Trove resulting from opening with `params` at `borrowing_rate`.
    pub fn create(params: &TroveCreationParams, borrowing_rate: Decimal) -> Trove {
        Trove::new(
            params.deposit_collateral,
            LIQUIDATION_RESERVE + apply_fee(borrowing_rate, params.borrow_debt),
        )
    }

    /// Creation parameters that would produce `that` at `borrowing_rate`.
    pub fn recreate(
        that: &Trove,
        borrowing_rate: Decimal,
    ) -> Result<TroveCreationParams, UserInputError> {
        match Trove::EMPTY.what_changed(that, borrowing_rate)? {
            Some(TroveChange::Creation(params)) => Ok(params),
            _ => Err(UserInputError::InvalidTroveParams(format!(
                "trove {that:?} can't be created"
            ))),
        }
    }

    /// Trove resulting from applying `params` at `borrowing_rate`.
    pub fn adjust(&self, params: &TroveAdjustmentParams, borrowing_rate: Decimal) -> Trove {
        self.apply_adjustment(params, None, borrowing_rate)
    }

    /// Adjustment parameters that turn `self` into `that` at `borrowing_rate`.
    pub fn adjust_to(
        &self,
        that: &Trove,
        borrowing_rate: Decimal,
    ) -> Result<TroveAdjustmentParams, UserInputError> {
        match self.what_changed(that, borrowing_rate)? {
            Some(TroveChange::Adjustment { params, .. }) => Ok(params),
            _ => Err(UserInputError::InvalidTroveParams(format!(
                "{self:?} can't be adjusted to {that:?}"
            ))),
        }
    }
}

fn apply_fee(borrowing_rate: Decimal, debt_increase: Decimal) -> Decimal {
    debt_increase * (Decimal::ONE + borrowing_rate)
}

fn unapply_fee(borrowing_rate: Decimal, debt_increase: Decimal) -> Decimal {
    debt_increase.div_ceil(Decimal::ONE + borrowing_rate)
}

/// Parameters of opening a trove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveCreationParams {
    pub deposit_collateral: Decimal,
    /// Net amount received; fee and reserve come on top
    pub borrow_debt: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralChange {
    Deposit(Decimal),
    Withdraw(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebtChange {
    /// Net amount received; the fee is added to the trove's debt
    Borrow(Decimal),
    Repay(Decimal),
}

/// Parameters of adjusting an existing trove. At least one side is set and
/// no amount is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveAdjustmentParams {
    pub collateral: Option<CollateralChange>,
    pub debt: Option<DebtChange>,
}

impl TroveAdjustmentParams {
    /// Normalize the four optional amounts. Zero amounts are dropped; giving
    /// both directions of the same side, or nothing non-zero, is an error.
    pub fn new(
        deposit_collateral: Option<Decimal>,
        withdraw_collateral: Option<Decimal>,
        borrow_debt: Option<Decimal>,
        repay_debt: Option<Decimal>,
    ) -> Result<Self, UserInputError> {
        let non_zero = |v: Option<Decimal>| v.filter(|v| !v.is_zero());

        let collateral = match (non_zero(deposit_collateral), non_zero(withdraw_collateral)) {
            (Some(_), Some(_)) => {
                return Err(UserInputError::InvalidTroveParams(
                    "deposit and withdrawal of collateral can't be present at the same time".into(),
                ))
            }
            (Some(amount), None) => Some(CollateralChange::Deposit(amount)),
            (None, Some(amount)) => Some(CollateralChange::Withdraw(amount)),
            (None, None) => None,
        };

        let debt = match (non_zero(borrow_debt), non_zero(repay_debt)) {
            (Some(_), Some(_)) => {
                return Err(UserInputError::InvalidTroveParams(
                    "borrowing and repayment can't be present at the same time".into(),
                ))
            }
            (Some(amount), None) => Some(DebtChange::Borrow(amount)),
            (None, Some(amount)) => Some(DebtChange::Repay(amount)),
            (None, None) => None,
        };

        if collateral.is_none() && debt.is_none() {
            return Err(UserInputError::InvalidTroveParams(
                "must include at least one non-zero parameter".into(),
            ));
        }

        Ok(Self { collateral, debt })
    }

    pub fn deposit(amount: Decimal) -> Result<Self, UserInputError> {
        Self::new(Some(amount), None, None, None)
    }

    pub fn withdraw(amount: Decimal) -> Result<Self, UserInputError> {
        Self::new(None, Some(amount), None, None)
    }

    pub fn borrow(amount: Decimal) -> Result<Self, UserInputError> {
        Self::new(None, None, Some(amount), None)
    }

    pub fn repay(amount: Decimal) -> Result<Self, UserInputError> {
        Self::new(None, None, None, Some(amount))
    }

    pub fn borrowed(&self) -> Option<Decimal> {
        match self.debt {
            Some(DebtChange::Borrow(amount)) => Some(amount),
            _ => None,
        }
    }
}

/// Parameters of closing a trove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveClosureParams {
    pub withdraw_collateral: Decimal,
    pub repay_debt: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TroveCreationError {
    MissingLiquidationReserve,
}

/// Which side an adjustment zeroes out regardless of its amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetToZero {
    Collateral,
    Debt,
}

/// Difference between two trove states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TroveChange {
    InvalidCreation {
        invalid_trove: Trove,
        error: TroveCreationError,
    },
    Creation(TroveCreationParams),
    Closure(TroveClosureParams),
    Adjustment {
        params: TroveAdjustmentParams,
        set_to_zero: Option<SetToZero>,
    },
}

/// On-chain status of a trove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TroveStatus {
    #[default]
    NonExistent,
    Open,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

impl TroveStatus {
    /// Decode the contract's status enum. Unknown values map to `NonExistent`.
    pub fn from_u8(status: u8) -> Self {
        match status {
            1 => Self::Open,
            2 => Self::ClosedByOwner,
            3 => Self::ClosedByLiquidation,
            4 => Self::ClosedByRedemption,
            _ => Self::NonExistent,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::NonExistent => 0,
            Self::Open => 1,
            Self::ClosedByOwner => 2,
            Self::ClosedByLiquidation => 3,
            Self::ClosedByRedemption => 4,
        }
    }
}

/// A trove together with its owner and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserTrove {
    pub owner: Address,
    pub status: TroveStatus,
    pub trove: Trove,
}

impl UserTrove {
    pub fn new(owner: Address, status: TroveStatus, trove: Trove) -> Self {
        Self {
            owner,
            status,
            trove,
        }
    }
}

/// A trove as stored on chain, before pending redistribution is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TroveWithPendingRedistribution {
    pub user_trove: UserTrove,
    pub stake: Decimal,
    /// Redistribution totals at the trove's last touch
    pub snapshot_of_total_redistributed: Trove,
}

impl TroveWithPendingRedistribution {
    /// Build from a raw record. Troves that are not open carry no values.
    pub fn from_record(owner: Address, record: &TroveRecord) -> Self {
        let status = TroveStatus::from_u8(record.status);
        if status != TroveStatus::Open {
            return Self {
                user_trove: UserTrove::new(owner, status, Trove::EMPTY),
                stake: Decimal::ZERO,
                snapshot_of_total_redistributed: Trove::EMPTY,
            };
        }

        Self {
            user_trove: UserTrove::new(
                owner,
                status,
                Trove::new(
                    Decimal::from_raw(record.collateral),
                    Decimal::from_raw(record.debt),
                ),
            ),
            stake: Decimal::from_raw(record.stake),
            snapshot_of_total_redistributed: Trove::new(
                Decimal::from_raw(record.snapshot_collateral),
                Decimal::from_raw(record.snapshot_debt),
            ),
        }
    }

    /// Inverse of [`from_record`](Self::from_record).
    pub fn to_record(&self) -> TroveRecord {
        TroveRecord {
            status: self.user_trove.status.as_u8(),
            collateral: self.user_trove.trove.collateral.raw(),
            debt: self.user_trove.trove.debt.raw(),
            stake: self.stake.raw(),
            snapshot_collateral: self.snapshot_of_total_redistributed.collateral.raw(),
            snapshot_debt: self.snapshot_of_total_redistributed.debt.raw(),
        }
    }

    /// Resolve against the current redistribution totals.
    pub fn apply_redistribution(&self, total_redistributed: &Trove) -> UserTrove {
        let pending = total_redistributed
            .subtract(&self.snapshot_of_total_redistributed)
            .multiply(self.stake);
        UserTrove::new(
            self.user_trove.owner,
            self.user_trove.status,
            self.user_trove.trove.add(&pending),
        )
    }
}

/// Something that can be placed in the sorted list.
pub trait Hintable {
    /// Ordering key, or an error if it can't be trusted yet.
    fn hint_key(&self) -> Result<Decimal, UserInputError>;
}

impl Hintable for Trove {
    fn hint_key(&self) -> Result<Decimal, UserInputError> {
        Ok(self.nominal_collateral_ratio())
    }
}

impl Hintable for UserTrove {
    fn hint_key(&self) -> Result<Decimal, UserInputError> {
        Ok(self.trove.nominal_collateral_ratio())
    }
}

impl Hintable for TroveWithPendingRedistribution {
    fn hint_key(&self) -> Result<Decimal, UserInputError> {
        Err(UserInputError::RedistributionNotApplied)
    }
}
