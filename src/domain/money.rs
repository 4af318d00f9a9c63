//! Money types
//!
//! Domain primitives for monetary values in the tenant's currency.
//! Values are fixed-point decimals with at most 2 decimal places, so
//! repeated operations never accumulate floating-point error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Maximum allowed single value (10 billion in the tenant's currency)
const MAX_MONEY: i64 = 10_000_000_000;

/// Maximum decimal places (minor currency unit)
const MAX_SCALE: u32 = 2;

/// Errors that can occur when creating a monetary value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_MONEY})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

/// Money is a signed ledger value.
///
/// Ledger fields such as `balance` may legitimately drop below zero
/// (a discount granted after settlement), so `Money` itself is signed.
/// Use [`Money::non_negative`] or [`Amount`] where inputs must be
/// validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Wrap a decimal, rounding to the currency's minor unit.
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp(MAX_SCALE))
    }

    /// Whole currency units.
    pub fn from_major(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    /// Validate a value supplied by a caller: non-negative, bounded,
    /// at most 2 decimal places.
    pub fn non_negative(value: Decimal) -> Result<Self, MoneyError> {
        if value < Decimal::ZERO {
            return Err(MoneyError::Negative(value));
        }
        if value.scale() > MAX_SCALE && value.normalize().scale() > MAX_SCALE {
            return Err(MoneyError::TooManyDecimals(value.scale()));
        }
        if value > Decimal::from(MAX_MONEY) {
            return Err(MoneyError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Clamp negative values to zero.
    pub fn floor_zero(self) -> Self {
        if self.0 < Decimal::ZERO {
            Self::ZERO
        } else {
            self
        }
    }

    /// `percent` of this value (e.g. 10 for 10%), rounded half away from
    /// zero to the minor unit.
    pub fn percent(&self, percent: Decimal) -> Self {
        let raw = self.0 * percent / Decimal::ONE_HUNDRED;
        Self(raw.round_dp_with_strategy(
            MAX_SCALE,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        ))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Money::non_negative(decimal)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Money(amount.0)
    }
}

/// Amount represents a validated, strictly positive payment or charge.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum 2 decimal places
/// - Maximum value is 10 billion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use school_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(5000, 0)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(5000, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `MoneyError::NotPositive` if value <= 0
    /// - `MoneyError::TooManyDecimals` if more than 2 decimal places
    /// - `MoneyError::Overflow` if value > 10 billion
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NotPositive(value));
        }
        let money = Money::non_negative(value)?;
        Ok(Self(money.value()))
    }

    pub fn from_integer(value: i64) -> Result<Self, MoneyError> {
        Self::new(Decimal::from(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn as_money(&self) -> Money {
        Money(self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}
