use crate::model::parameters::Parameters;
use eyre::Report;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Symbolic rate-matrix or frequency entry, evaluated against a concrete
/// parameter assignment.
///
/// This is the contract presented to model-building collaborators; parsing
/// strings into expressions is their concern, not this crate's. The
/// `Display` form is the literal used as the evaluation-cache key when a
/// probability cache is built (many matrix cells repeat the same
/// expression).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RateExpr {
  Const(f64),
  Param(String),
  /// Constant multiple of one parameter, the most common cell shape
  Scaled(f64, String),
  Sum(Vec<RateExpr>),
  Product(Vec<RateExpr>),
}

impl RateExpr {
  pub fn param(name: impl Into<String>) -> Self {
    Self::Param(name.into())
  }

  pub fn scaled(coeff: f64, name: impl Into<String>) -> Self {
    Self::Scaled(coeff, name.into())
  }

  pub fn eval(&self, params: &Parameters) -> Result<f64, Report> {
    match self {
      Self::Const(value) => Ok(*value),
      Self::Param(name) => params.value(name),
      Self::Scaled(coeff, name) => Ok(coeff * params.value(name)?),
      Self::Sum(terms) => terms.iter().map(|term| term.eval(params)).sum(),
      Self::Product(factors) => factors.iter().map(|factor| factor.eval(params)).product(),
    }
  }
}

impl From<f64> for RateExpr {
  fn from(value: f64) -> Self {
    Self::Const(value)
  }
}

impl From<&str> for RateExpr {
  fn from(name: &str) -> Self {
    Self::Param(name.to_owned())
  }
}

impl Display for RateExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Const(value) => write!(f, "{value}"),
      Self::Param(name) => write!(f, "{name}"),
      Self::Scaled(coeff, name) => write!(f, "{coeff}*{name}"),
      Self::Sum(terms) => write!(f, "({})", terms.iter().join("+")),
      Self::Product(factors) => write!(f, "({})", factors.iter().join("*")),
    }
  }
}
