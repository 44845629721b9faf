use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Arithmetic abstraction used for every likelihood value.
///
/// Site likelihoods are products of many per-branch transition
/// probabilities (each ≤ 1) across potentially hundreds of taxa. With
/// native doubles such products underflow to exact zero on large trees and
/// silently corrupt log-likelihood sums, so all likelihood arithmetic goes
/// through this trait and the representation is chosen per run
/// ([`crate::config::ScalarKind`]): native `f64`, or the unbounded-range
/// [`crate::scalar::scaled::ScaledFloat`].
pub trait Scalar:
  Copy
  + Clone
  + Debug
  + Display
  + PartialEq
  + PartialOrd
  + Add<Output = Self>
  + Sub<Output = Self>
  + Mul<Output = Self>
  + Div<Output = Self>
  + Neg<Output = Self>
  + Sum<Self>
  + Send
  + Sync
  + 'static
{
  fn zero() -> Self;

  fn one() -> Self;

  fn from_f64(x: f64) -> Self;

  /// Convert back to a native double. Values outside the representable
  /// range collapse to 0.0 or ±infinity.
  fn to_f64(self) -> f64;

  fn recip(self) -> Self;

  fn is_zero(self) -> bool;

  fn gt(self, other: Self) -> bool {
    matches!(self.partial_cmp(&other), Some(std::cmp::Ordering::Greater))
  }

  /// Natural logarithm, as a native double (logs of probabilities are
  /// always representable)
  fn ln(self) -> f64;

  /// ln(1 - x), stable for x near zero
  fn ln_one_minus(self) -> f64;
}

impl Scalar for f64 {
  fn zero() -> Self {
    0.0
  }

  fn one() -> Self {
    1.0
  }

  fn from_f64(x: f64) -> Self {
    x
  }

  fn to_f64(self) -> f64 {
    self
  }

  fn recip(self) -> Self {
    f64::recip(self)
  }

  fn is_zero(self) -> bool {
    self == 0.0
  }

  fn ln(self) -> f64 {
    f64::ln(self)
  }

  fn ln_one_minus(self) -> f64 {
    // ln_1p keeps precision where (1.0 - x).ln() would cancel
    f64::ln_1p(-self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use rstest::rstest;

  #[rstest]
  fn plain_ln_one_minus_is_stable_near_zero() {
    let x = 1e-17_f64;
    // (1.0 - x).ln() would round to exactly 0.0 here
    assert_ulps_eq!(Scalar::ln_one_minus(x), -1e-17, epsilon = 1e-25);
  }

  #[rstest]
  fn plain_underflows_to_zero() {
    let mut product = 1.0_f64;
    for _ in 0..200 {
      product = product * 1e-2;
    }
    assert_eq!(product, 0.0);
  }
}
