//! Stability pool deposits, governance token stakes and frontend
//! registrations.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use trove_chain::{FrontendRecord, StabilityDepositRecord, StakeRecord};

use crate::decimal::Decimal;

/// A stability pool deposit and its accrued gains.
///
/// `current` never exceeds `initial`: liquidations only eat into a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StabilityDeposit {
    /// Deposit at the last direct modification
    pub initial: Decimal,
    /// Deposit left after absorbing liquidations
    pub current: Decimal,
    pub collateral_gain: Decimal,
    pub governance_token_reward: Decimal,
    /// Frontend the deposit was made through; zero if untagged
    pub frontend_tag: Address,
}

/// Difference between two deposited amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityDepositChange {
    Deposit(Decimal),
    Withdraw { amount: Decimal, withdraw_all: bool },
}

impl StabilityDeposit {
    /// Build from a raw record, clamping `current` to `initial`.
    pub fn from_record(record: &StabilityDepositRecord) -> Self {
        let initial = Decimal::from_raw(record.initial_value);
        Self {
            initial,
            current: Decimal::from_raw(record.compounded_deposit).min(initial),
            collateral_gain: Decimal::from_raw(record.collateral_gain),
            governance_token_reward: Decimal::from_raw(record.governance_token_gain),
            frontend_tag: record.frontend_tag,
        }
    }

    /// Inverse of [`from_record`](Self::from_record).
    pub fn to_record(&self) -> StabilityDepositRecord {
        StabilityDepositRecord {
            initial_value: self.initial.raw(),
            compounded_deposit: self.current.raw(),
            collateral_gain: self.collateral_gain.raw(),
            governance_token_gain: self.governance_token_reward.raw(),
            frontend_tag: self.frontend_tag,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_zero()
            && self.current.is_zero()
            && self.collateral_gain.is_zero()
            && self.governance_token_reward.is_zero()
    }

    /// Change that takes the current deposit to `that`, or `None` if equal.
    pub fn what_changed(&self, that: Decimal) -> Option<StabilityDepositChange> {
        if that < self.current {
            Some(StabilityDepositChange::Withdraw {
                amount: self.current - that,
                withdraw_all: that.is_zero(),
            })
        } else if that > self.current {
            Some(StabilityDepositChange::Deposit(that - self.current))
        } else {
            None
        }
    }

    /// Deposited amount after `change`.
    pub fn apply(&self, change: Option<&StabilityDepositChange>) -> Decimal {
        match change {
            None => self.current,
            Some(StabilityDepositChange::Deposit(amount)) => self.current + *amount,
            Some(StabilityDepositChange::Withdraw {
                amount,
                withdraw_all,
            }) => {
                if *withdraw_all || self.current <= *amount {
                    Decimal::ZERO
                } else {
                    self.current - *amount
                }
            }
        }
    }
}

/// Staked governance tokens and the fee gains they earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stake {
    pub staked: Decimal,
    pub collateral_gain: Decimal,
    pub debt_token_gain: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeChange {
    Stake(Decimal),
    Unstake { amount: Decimal, unstake_all: bool },
}

impl Stake {
    pub fn from_record(record: &StakeRecord) -> Self {
        Self {
            staked: Decimal::from_raw(record.staked),
            collateral_gain: Decimal::from_raw(record.collateral_gain),
            debt_token_gain: Decimal::from_raw(record.debt_token_gain),
        }
    }

    pub fn to_record(&self) -> StakeRecord {
        StakeRecord {
            staked: self.staked.raw(),
            collateral_gain: self.collateral_gain.raw(),
            debt_token_gain: self.debt_token_gain.raw(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staked.is_zero() && self.collateral_gain.is_zero() && self.debt_token_gain.is_zero()
    }

    pub fn what_changed(&self, that: Decimal) -> Option<StakeChange> {
        if that < self.staked {
            Some(StakeChange::Unstake {
                amount: self.staked - that,
                unstake_all: that.is_zero(),
            })
        } else if that > self.staked {
            Some(StakeChange::Stake(that - self.staked))
        } else {
            None
        }
    }

    pub fn apply(&self, change: Option<&StakeChange>) -> Decimal {
        match change {
            None => self.staked,
            Some(StakeChange::Stake(amount)) => self.staked + *amount,
            Some(StakeChange::Unstake {
                amount,
                unstake_all,
            }) => {
                if *unstake_all || self.staked <= *amount {
                    Decimal::ZERO
                } else {
                    self.staked - *amount
                }
            }
        }
    }
}

/// Whether an address is registered as a stability pool frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrontendStatus {
    #[default]
    Unregistered,
    /// Share of governance token rewards passed on to depositors
    Registered { kickback_rate: Decimal },
}

impl FrontendStatus {
    pub fn from_record(record: &FrontendRecord) -> Self {
        if record.registered {
            Self::Registered {
                kickback_rate: Decimal::from_raw(record.kickback_rate),
            }
        } else {
            Self::Unregistered
        }
    }

    pub fn to_record(&self) -> FrontendRecord {
        match self {
            Self::Unregistered => FrontendRecord::default(),
            Self::Registered { kickback_rate } => FrontendRecord {
                registered: true,
                kickback_rate: kickback_rate.raw(),
            },
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}
