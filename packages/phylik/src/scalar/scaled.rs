use crate::constants::SCALED_MAX_EXPONENT_GAP;
use crate::scalar::scalar::Scalar;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Power of two as a double. Exponents beyond the representable range
/// collapse to 0.0 or infinity, which is the behavior the arithmetic below
/// relies on when dropping negligible addends.
fn exp2i(e: i64) -> f64 {
  if e > 1024 {
    f64::INFINITY
  } else if e < -1100 {
    0.0
  } else {
    (e as f64).exp2()
  }
}

/// Floating point value stored as a normalized (mantissa, binary exponent)
/// pair, with |mantissa| in [1, 2) for nonzero values.
///
/// Multiplication adds exponents, so chains of thousands of sub-unit
/// factors keep full precision where a native double underflows to exact
/// zero. The constant-factor overhead buys unbounded dynamic range.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ScaledFloat {
  mantissa: f64,
  exponent: i64,
}

impl ScaledFloat {
  pub const ZERO: Self = Self {
    mantissa: 0.0,
    exponent: 0,
  };

  pub const ONE: Self = Self {
    mantissa: 1.0,
    exponent: 0,
  };

  pub fn new(value: f64) -> Self {
    Self::normalized(value, 0)
  }

  /// Renormalize so that |mantissa| lands in [1, 2)
  fn normalized(mantissa: f64, exponent: i64) -> Self {
    if mantissa == 0.0 {
      return Self::ZERO;
    }
    if !mantissa.is_finite() {
      return Self { mantissa, exponent: 0 };
    }

    let shift = mantissa.abs().log2().floor() as i64;
    let mut mantissa = mantissa / exp2i(shift);
    let mut exponent = exponent + shift;

    // log2 rounding can leave the mantissa one binade off
    while mantissa.abs() >= 2.0 {
      mantissa /= 2.0;
      exponent += 1;
    }
    while mantissa.abs() < 1.0 {
      mantissa *= 2.0;
      exponent -= 1;
    }

    Self { mantissa, exponent }
  }

  pub const fn mantissa(&self) -> f64 {
    self.mantissa
  }

  pub const fn exponent(&self) -> i64 {
    self.exponent
  }
}

impl Display for ScaledFloat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}*2^{}", self.mantissa, self.exponent)
  }
}

impl Mul for ScaledFloat {
  type Output = Self;

  fn mul(self, rhs: Self) -> Self {
    Self::normalized(self.mantissa * rhs.mantissa, self.exponent + rhs.exponent)
  }
}

impl Div for ScaledFloat {
  type Output = Self;

  fn div(self, rhs: Self) -> Self {
    Self::normalized(self.mantissa / rhs.mantissa, self.exponent - rhs.exponent)
  }
}

impl Add for ScaledFloat {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    if self.mantissa == 0.0 {
      return rhs;
    }
    if rhs.mantissa == 0.0 {
      return self;
    }

    // Align the smaller operand to the larger one's exponent. An addend
    // whose exponent trails by more than the representable range is an
    // exact zero contribution.
    let (hi, lo) = if self.exponent >= rhs.exponent {
      (self, rhs)
    } else {
      (rhs, self)
    };
    let gap = hi.exponent - lo.exponent;
    if gap > SCALED_MAX_EXPONENT_GAP {
      return hi;
    }

    Self::normalized(hi.mantissa + lo.mantissa * exp2i(-gap), hi.exponent)
  }
}

impl Sub for ScaledFloat {
  type Output = Self;

  fn sub(self, rhs: Self) -> Self {
    self + (-rhs)
  }
}

impl Neg for ScaledFloat {
  type Output = Self;

  fn neg(self) -> Self {
    Self {
      mantissa: -self.mantissa,
      exponent: self.exponent,
    }
  }
}

impl Sum for ScaledFloat {
  fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
    iter.fold(Self::ZERO, Add::add)
  }
}

impl PartialEq for ScaledFloat {
  fn eq(&self, other: &Self) -> bool {
    self.partial_cmp(other) == Some(Ordering::Equal)
  }
}

impl PartialOrd for ScaledFloat {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    if self.mantissa.is_nan() || other.mantissa.is_nan() {
      return None;
    }

    let sign = |x: &Self| -> i8 {
      if x.mantissa > 0.0 {
        1
      } else if x.mantissa < 0.0 {
        -1
      } else {
        0
      }
    };

    let (s1, s2) = (sign(self), sign(other));
    if s1 != s2 {
      return s1.partial_cmp(&s2);
    }
    if s1 == 0 {
      return Some(Ordering::Equal);
    }

    // Same nonzero sign: compare exponents first, mantissas second. For
    // negative values the exponent ordering reverses.
    let ord = match self.exponent.cmp(&other.exponent) {
      Ordering::Equal => self.mantissa.partial_cmp(&other.mantissa)?,
      ord if s1 > 0 => ord,
      ord => ord.reverse(),
    };
    Some(ord)
  }
}

impl Scalar for ScaledFloat {
  fn zero() -> Self {
    Self::ZERO
  }

  fn one() -> Self {
    Self::ONE
  }

  fn from_f64(x: f64) -> Self {
    Self::new(x)
  }

  fn to_f64(self) -> f64 {
    self.mantissa * exp2i(self.exponent)
  }

  fn recip(self) -> Self {
    Self::normalized(self.mantissa.recip(), -self.exponent)
  }

  fn is_zero(self) -> bool {
    self.mantissa == 0.0
  }

  fn ln(self) -> f64 {
    if self.mantissa == 0.0 {
      f64::NEG_INFINITY
    } else if self.mantissa < 0.0 {
      f64::NAN
    } else {
      self.mantissa.ln() + (self.exponent as f64) * std::f64::consts::LN_2
    }
  }

  fn ln_one_minus(self) -> f64 {
    // For small values the conversion to a double is exact enough and
    // ln_1p avoids the cancellation of forming 1 - x explicitly
    if self.exponent < -1 {
      f64::ln_1p(-self.to_f64())
    } else {
      Scalar::ln(Self::ONE - self)
    }
  }
}
