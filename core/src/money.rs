//! Fixed-precision money.
//!
//! Amounts are `rust_decimal::Decimal` values normalised to two decimal places
//! (half away from zero) on construction, so arithmetic never drifts the way
//! floating point does and equality is exact.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Number of decimal places kept for every amount.
const SCALE: u32 = 2;

/// Monetary amount with two decimal places.
///
/// Currency is carried separately (orders store an ISO-4217 code); `Money`
/// itself is currency-agnostic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create an amount, rounding to two decimal places.
    #[must_use]
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Create an amount from minor units (cents).
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, SCALE))
    }

    /// The underlying decimal value.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Minor units (cents), as provider APIs expect. `None` if out of range.
    #[must_use]
    pub fn to_cents(&self) -> Option<i64> {
        let mut cents = self.0;
        cents.rescale(SCALE);
        i64::try_from(cents.mantissa()).ok()
    }

    /// True when the amount is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when the amount is below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// True when the amount is above zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Add with overflow checking.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self::new)
    }

    /// Subtract with overflow checking. The result may be negative.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self::new)
    }

    /// Multiply by a quantity with overflow checking.
    #[must_use]
    pub fn checked_mul_quantity(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self::new)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.0 - other.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, amount| acc + amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(Money::new(dec!(10.005)), Money::new(dec!(10.01)));
        assert_eq!(Money::new(dec!(-10.005)), Money::new(dec!(-10.01)));
    }

    #[test]
    fn equality_ignores_trailing_zeros() {
        assert_eq!(Money::new(dec!(120)), Money::from_cents(12_000));
    }

    #[test]
    fn converts_to_cents() {
        assert_eq!(Money::from_cents(4_050).to_cents(), Some(4_050));
        assert_eq!(Money::new(Decimal::new(12, 0)).to_cents(), Some(1_200));
        assert_eq!(Money::ZERO.to_cents(), Some(0));
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let from_number: Money = serde_json::from_str("40.5").unwrap();
        let from_string: Money = serde_json::from_str("\"40.50\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.to_string(), "40.50");
    }

    #[test]
    fn sums_line_totals() {
        let total: Money = [Money::from_cents(1999), Money::from_cents(1)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(2000));
    }

    #[test]
    fn multiplies_by_quantity() {
        let line = Money::from_cents(6000).checked_mul_quantity(2);
        assert_eq!(line, Some(Money::from_cents(12_000)));
    }
}
