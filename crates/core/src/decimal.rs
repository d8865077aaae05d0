//! 18-decimal fixed-point arithmetic over U256.
//!
//! Values cross the chain boundary as raw `U256` with 18 decimals; this
//! wrapper keeps that representation and adds the handful of operations the
//! client needs (fee application, ratios, decay exponentiation) without any
//! String or f64 round trips.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// Number of decimal places.
pub const PRECISION: usize = 18;

/// 1e18, the raw value of `1.0`
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

const HALF_WAD: U256 = U256::from_limbs([500_000_000_000_000_000u64, 0, 0, 0]);

/// Non-negative fixed-point number with 18 decimals.
///
/// `U256::MAX` is reserved as [`Decimal::INFINITY`]; dividing by zero
/// yields it, and overflowing products saturate to it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal(U256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecimalParseError {
    #[error("'{0}' is not a decimal number")]
    Invalid(String),
    #[error("'{0}' has more than 18 decimal places")]
    TooPrecise(String),
    #[error("'{0}' does not fit into 256 bits")]
    Overflow(String),
}

impl Decimal {
    pub const ZERO: Self = Self(U256::ZERO);
    pub const ONE: Self = Self(WAD);
    pub const INFINITY: Self = Self(U256::MAX);

    /// Wrap a raw 18-decimal value.
    #[inline]
    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    /// Raw value from a `u128` literal, usable in constants.
    pub const fn from_raw_u128(raw: u128) -> Self {
        Self(U256::from_limbs([raw as u64, (raw >> 64) as u64, 0, 0]))
    }

    /// Whole number.
    pub fn from_int(value: u64) -> Self {
        Self(U256::from(value) * WAD)
    }

    #[inline]
    pub const fn raw(&self) -> U256 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.0 == U256::MAX
    }

    /// Truncating multiplication.
    pub fn mul(self, rhs: Self) -> Self {
        match self.0.checked_mul(rhs.0) {
            Some(product) => Self(product / WAD),
            None => Self::INFINITY,
        }
    }

    /// Truncating division; division by zero is infinite.
    pub fn div(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::INFINITY;
        }
        match self.0.checked_mul(WAD) {
            Some(scaled) => Self(scaled / rhs.0),
            None => Self::INFINITY,
        }
    }

    /// Division rounding up.
    pub fn div_ceil(self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Self::INFINITY;
        }
        match self.0.checked_mul(WAD) {
            Some(scaled) => Self(scaled.div_ceil(rhs.0)),
            None => Self::INFINITY,
        }
    }

    /// `self * multiplier / divider` with a single truncation.
    pub fn mul_div(self, multiplier: Self, divider: Self) -> Self {
        if divider.is_zero() {
            return Self::INFINITY;
        }
        match self.0.checked_mul(multiplier.0) {
            Some(product) => Self(product / divider.0),
            None => Self::INFINITY,
        }
    }

    /// Integer power by squaring, rounding each intermediate product to
    /// nearest.
    pub fn pow(self, mut exponent: u64) -> Self {
        if exponent == 0 {
            return Self::ONE;
        }
        if exponent == 1 {
            return self;
        }

        let mut x = self.0;
        let mut y = WAD;

        while exponent > 1 {
            if exponent & 1 == 1 {
                y = rounded_mul(x, y);
            }
            x = rounded_mul(x, x);
            exponent >>= 1;
        }

        Self(rounded_mul(x, y))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }

    /// Approximate value for logging. Not for computation.
    pub fn to_f64(&self) -> f64 {
        if self.0 <= U256::from(u128::MAX) {
            let value: u128 = self.0.to();
            value as f64 / 1e18
        } else {
            let limbs = self.0.as_limbs();
            let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
            (high + limbs[0] as f64) / 1e18
        }
    }
}

fn rounded_mul(x: U256, y: U256) -> U256 {
    x.saturating_mul(y).saturating_add(HALF_WAD) / WAD
}

impl Add for Decimal {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

/// Saturates at zero.
impl Sub for Decimal {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl Mul for Decimal {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Decimal::mul(self, rhs)
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Self::from_int(value)
    }
}

impl FromStr for Decimal {
    type Err = DecimalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (trimmed, ""),
        };

        let digits_only = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !digits_only(int_part)
            || !digits_only(frac_part)
        {
            return Err(DecimalParseError::Invalid(s.to_string()));
        }
        if frac_part.len() > PRECISION {
            return Err(DecimalParseError::TooPrecise(s.to_string()));
        }

        let padded = format!("{int_part}{frac_part:0<PRECISION$}");
        let raw = U256::from_str_radix(&padded, 10)
            .map_err(|_| DecimalParseError::Overflow(s.to_string()))?;
        Ok(Self(raw))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return f.write_str("∞");
        }
        let characteristic = self.0 / WAD;
        let mantissa: u64 = (self.0 % WAD).to();
        if mantissa == 0 {
            return write!(f, "{characteristic}");
        }
        let fraction = format!("{mantissa:0>PRECISION$}");
        write!(f, "{characteristic}.{}", fraction.trim_end_matches('0'))
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Serialized as a decimal string so no precision is lost in JSON.
impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "∞" {
            return Ok(Self::INFINITY);
        }
        s.parse().map_err(serde::de::Error::custom)
    }
}
