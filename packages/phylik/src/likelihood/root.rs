use crate::make_error;
use crate::scalar::scalar::Scalar;
use eyre::Report;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// How the root's partial likelihood vector is collapsed into one scalar
/// per rate category.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootPolicy {
  /// Weight each root state by the category's root frequency
  #[default]
  Standard,
  /// FitzJohn-style conditioning for processes whose root frequencies are
  /// undefined a priori (birth-death-type models): the effective root
  /// distribution is derived from the data itself as L[s]/ΣL, giving
  /// Σ L[s]² / Σ L[s].
  FitzJohn,
}

impl RootPolicy {
  pub fn combine<S: Scalar>(self, likelihood: &[S], freqs: &Array1<f64>) -> S {
    match self {
      Self::Standard => likelihood
        .iter()
        .zip(freqs.iter())
        .map(|(&l, &f)| l * S::from_f64(f))
        .sum(),
      Self::FitzJohn => {
        let total: S = likelihood.iter().copied().sum();
        if total.is_zero() {
          S::zero()
        } else {
          let weighted: S = likelihood.iter().map(|&l| l * l).sum();
          weighted / total
        }
      }
    }
  }

  /// Root frequencies as an independent vector. Undefined for the
  /// FitzJohn policy, whose frequencies are a function of the likelihood.
  pub fn freqs<'a>(self, freqs: &'a Array1<f64>) -> Result<&'a Array1<f64>, Report> {
    match self {
      Self::Standard => Ok(freqs),
      Self::FitzJohn => make_error!(
        "FitzJohn conditioned root has no root frequencies independent of the data; they cannot be queried directly"
      ),
    }
  }
}
