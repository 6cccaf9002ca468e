use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Exact amount in cents. `None` when the amount has a sub-cent part or
    /// does not fit an `i64`.
    pub fn to_cents(self) -> Option<i64> {
        let cents = self.0 * Decimal::ONE_HUNDRED;
        if !cents.fract().is_zero() {
            return None;
        }
        cents.to_i64()
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn abs_diff(self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} €", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip() {
        let m = Money::from_cents(8990);
        assert_eq!(m, "89.90".parse().unwrap());
        assert_eq!(m.to_cents(), Some(8990));
    }

    #[test]
    fn to_cents_refuses_sub_cent_amounts() {
        let m: Money = "10.005".parse().unwrap();
        assert_eq!(m.to_cents(), None);
        let m: Money = "10.010".parse().unwrap();
        assert_eq!(m.to_cents(), Some(1001));
        let m: Money = "7".parse().unwrap();
        assert_eq!(m.to_cents(), Some(700));
    }

    #[test]
    fn abs_diff_is_symmetric_and_non_negative() {
        let a = Money::from_cents(9000);
        let b = Money::from_cents(8990);
        assert_eq!(a.abs_diff(b), Money::from_cents(10));
        assert_eq!(b.abs_diff(a), Money::from_cents(10));
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_cents(15000).to_string(), "150.00 €");
        assert_eq!("0.1".parse::<Money>().unwrap().to_string(), "0.10 €");
    }

    #[test]
    fn sum_of_empty_iterator_is_zero() {
        let total: Money = Vec::<Money>::new().into_iter().sum();
        assert!(total.is_zero());
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Money::from_cents(15000)).unwrap();
        assert_eq!(json, "\"150.00\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_cents(15000));
    }
}
