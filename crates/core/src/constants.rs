//! Protocol parameters mirrored from the deployed contracts.

use crate::decimal::Decimal;

/// Minimum collateral ratio of an individual trove (110%).
pub const MINIMUM_COLLATERAL_RATIO: Decimal = Decimal::from_raw_u128(1_100_000_000_000_000_000);

/// Total collateral ratio below which the system enters recovery mode (150%).
pub const CRITICAL_COLLATERAL_RATIO: Decimal = Decimal::from_raw_u128(1_500_000_000_000_000_000);

/// Debt reserved per trove for liquidation gas compensation.
pub const LIQUIDATION_RESERVE: Decimal = Decimal::from_raw_u128(200_000_000_000_000_000_000);

/// Smallest total debt an open trove may carry.
pub const MINIMUM_DEBT: Decimal = Decimal::from_raw_u128(2_000_000_000_000_000_000_000);

/// `MINIMUM_DEBT` minus the liquidation reserve.
pub const MINIMUM_NET_DEBT: Decimal = Decimal::from_raw_u128(1_800_000_000_000_000_000_000);

pub const MINIMUM_BORROWING_RATE: Decimal = Decimal::from_raw_u128(5_000_000_000_000_000);
pub const MAXIMUM_BORROWING_RATE: Decimal = Decimal::from_raw_u128(50_000_000_000_000_000);
pub const MINIMUM_REDEMPTION_RATE: Decimal = Decimal::from_raw_u128(5_000_000_000_000_000);

/// Scale factor of the nominal collateral ratio (collateral * 100 / debt).
pub const NOMINAL_COLLATERAL_RATIO_PRECISION: Decimal =
    Decimal::from_raw_u128(100_000_000_000_000_000_000);

/// Trove count the redemption hint helper walks at most.
pub const REDEMPTION_MAX_ITERATIONS: u64 = 70;
