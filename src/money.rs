//! Fixed-point money arithmetic.
//!
//! All monetary fields in the game use integer minor units (6 decimal
//! places) instead of floats. Pot splits and fee cuts are exact and
//! reproducible; a payout can never be NaN or drift between runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Minor units per whole currency unit.
const MINOR_PER_UNIT: u64 = 1_000_000;

/// A non-negative amount of game currency stored as minor units.
///
/// Internally `value * 1_000_000` as a `u64`. Serialized as the raw
/// minor-unit integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Creates an amount from whole currency units.
    #[inline]
    #[must_use]
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole * MINOR_PER_UNIT)
    }

    /// Creates an amount from raw minor units.
    #[inline]
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Raw minor-unit value.
    #[inline]
    #[must_use]
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// Whole-unit part.
    #[inline]
    #[must_use]
    pub const fn whole(self) -> u64 {
        self.0 / MINOR_PER_UNIT
    }

    /// Fractional part in minor units (0..1_000_000).
    #[inline]
    #[must_use]
    pub const fn fraction(self) -> u32 {
        (self.0 % MINOR_PER_UNIT) as u32
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition. `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction. `None` on underflow.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by basis points (10_000 = 100%). Widens to u128 so the
    /// intermediate product cannot overflow.
    #[inline]
    #[must_use]
    pub const fn mul_bp(self, basis_points: u32) -> Self {
        Self(((self.0 as u128 * basis_points as u128) / 10_000) as u64)
    }

    /// Proportional share: `self * numerator / denominator`, rounded down.
    ///
    /// A zero denominator yields zero rather than a division error. This is
    /// the integer analogue of clamping a NaN payout share to nothing.
    #[inline]
    #[must_use]
    pub fn prorate(self, numerator: Money, denominator: Money) -> Self {
        if denominator.0 == 0 {
            return Self::ZERO;
        }
        Self(((self.0 as u128 * numerator.0 as u128) / denominator.0 as u128) as u64)
    }
}

impl Add for Money {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Money {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({}.{:06})", self.whole(), self.fraction())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.whole(), self.fraction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_whole() {
        let m = Money::from_whole(5);
        assert_eq!(m.minor(), 5_000_000);
        assert_eq!(m.whole(), 5);
        assert_eq!(m.fraction(), 0);
    }

    #[test]
    fn test_house_fee_cut() {
        // 5% of 5.00 is 0.25
        let pot = Money::from_whole(5);
        assert_eq!(pot.mul_bp(500), Money::from_minor(250_000));
    }

    #[test]
    fn test_prorate_equal_stakes() {
        // 4.75 split across 3 equal 1.00 stakes: 1.583333 each (floor)
        let net = Money::from_minor(4_750_000);
        let stake = Money::from_whole(1);
        let total = Money::from_whole(3);
        assert_eq!(net.prorate(stake, total), Money::from_minor(1_583_333));
    }

    #[test]
    fn test_prorate_zero_denominator() {
        let net = Money::from_whole(10);
        assert_eq!(net.prorate(Money::from_whole(1), Money::ZERO), Money::ZERO);
    }

    #[test]
    fn test_prorate_sum_never_exceeds_total() {
        let net = Money::from_minor(1_000_001);
        let stakes = [
            Money::from_minor(300_000),
            Money::from_minor(300_000),
            Money::from_minor(400_000),
        ];
        let total: Money = stakes.iter().copied().sum();
        let paid: Money = stakes.iter().map(|s| net.prorate(*s, total)).sum();
        assert!(paid <= net);
        // Truncation loss is bounded by one minor unit per recipient.
        assert!(net.minor() - paid.minor() < stakes.len() as u64);
    }

    #[test]
    fn test_checked_sub_underflow() {
        assert!(Money::ZERO.checked_sub(Money::from_whole(1)).is_none());
    }

    #[test]
    fn test_display() {
        let m = Money::from_minor(1_583_333);
        assert_eq!(format!("{m}"), "1.583333");
    }
}
