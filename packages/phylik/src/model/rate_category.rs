use crate::make_error;
use crate::matrix::q_matrix::QMatrix;
use crate::matrix::stationary::{quasi_stationary_distribution, stationary_distribution};
use crate::model::expr::RateExpr;
use crate::model::parameters::Parameters;
use crate::utils::ndarray::normalize_in_place;
use eyre::{Report, WrapErr};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use std::collections::HashMap;

/// How a category's root-state frequencies are obtained
#[derive(Clone, Debug, PartialEq)]
pub enum FreqStrategy {
  /// Explicit per-state expressions, normalized to sum 1 after evaluation
  Equations(Vec<RateExpr>),
  /// Stationary distribution of the category's rate matrix
  Stationary,
  /// Quasi-stationary distribution (conditional on non-absorption), for
  /// birth-death-type generators with absorbing states
  QuasiStationary,
}

/// One Markov generator of a (possibly mixture) model: a square matrix of
/// symbolic rate expressions over a fixed state list, plus a frequency
/// strategy.
///
/// The category itself is symbolic and immutable; numeric matrices are
/// built per parameter assignment by the probability cache, which owns all
/// derived caches (so nothing here is shared across concurrently-evaluated
/// parameter points).
#[derive(Clone, Debug, PartialEq)]
pub struct RateCategory {
  states: Vec<String>,
  rates: Vec<Vec<RateExpr>>,
  freq: FreqStrategy,
}

impl RateCategory {
  /// `rates` is indexed `[from][to]`; diagonal entries are ignored (the
  /// generator's diagonal is always the negative off-diagonal row sum).
  pub fn new<S: Into<String>>(
    states: impl IntoIterator<Item = S>,
    rates: Vec<Vec<RateExpr>>,
    freq: FreqStrategy,
  ) -> Result<Self, Report> {
    let states = states.into_iter().map(Into::into).collect_vec();
    let n = states.len();

    if n == 0 {
      return make_error!("Rate category must have at least one state");
    }
    if states.iter().unique().count() != n {
      return make_error!("Rate category states must be unique, but found [{}]", states.iter().join(", "));
    }
    if rates.len() != n || rates.iter().any(|row| row.len() != n) {
      return make_error!(
        "Rate expression matrix must be {n}x{n} to match the {n} states, but found {} rows of lengths [{}]",
        rates.len(),
        rates.iter().map(Vec::len).join(", ")
      );
    }
    if let FreqStrategy::Equations(eqs) = &freq {
      if eqs.len() != n {
        return make_error!(
          "Frequency equations must have one entry per state ({n}), but found {}",
          eqs.len()
        );
      }
    }

    Ok(Self { states, rates, freq })
  }

  pub fn n_states(&self) -> usize {
    self.states.len()
  }

  pub fn states(&self) -> &[String] {
    &self.states
  }

  pub const fn freq_strategy(&self) -> &FreqStrategy {
    &self.freq
  }

  /// Numeric generator for one parameter assignment. Cell evaluation is
  /// memoized by the literal expression text: most models repeat a handful
  /// of distinct expressions across many cells.
  pub(crate) fn build_q(&self, params: &Parameters, memo: &mut HashMap<String, f64>) -> Result<QMatrix, Report> {
    let n = self.n_states();
    let mut rates = Array2::<f64>::zeros((n, n));
    for (i, row) in self.rates.iter().enumerate() {
      for (j, expr) in row.iter().enumerate() {
        if i == j {
          continue;
        }
        let value = match memo.get(&expr.to_string()) {
          Some(&value) => value,
          None => {
            let value = expr
              .eval(params)
              .wrap_err_with(|| format!("When evaluating rate from '{}' to '{}'", self.states[i], self.states[j]))?;
            memo.insert(expr.to_string(), value);
            value
          }
        };
        rates[[i, j]] = value;
      }
    }
    QMatrix::from_rates(rates)
  }

  /// Root-state frequency vector for one parameter assignment
  pub(crate) fn resolve_freqs(
    &self,
    q: &QMatrix,
    params: &Parameters,
    memo: &mut HashMap<String, f64>,
  ) -> Result<Array1<f64>, Report> {
    match &self.freq {
      FreqStrategy::Equations(eqs) => {
        let mut freqs = Array1::<f64>::zeros(self.n_states());
        for (i, expr) in eqs.iter().enumerate() {
          let value = match memo.get(&expr.to_string()) {
            Some(&value) => value,
            None => {
              let value = expr
                .eval(params)
                .wrap_err_with(|| format!("When evaluating frequency of state '{}'", self.states[i]))?;
              memo.insert(expr.to_string(), value);
              value
            }
          };
          if !(value.is_finite() && value >= 0.0) {
            return make_error!(
              "Frequency of state '{}' must be finite and nonnegative, but evaluated to {value}",
              self.states[i]
            );
          }
          freqs[i] = value;
        }
        let norm = normalize_in_place(&mut freqs);
        if norm <= 0.0 {
          return make_error!("Frequency equations evaluated to all zeros; cannot normalize");
        }
        Ok(freqs)
      }
      FreqStrategy::Stationary => stationary_distribution(q),
      FreqStrategy::QuasiStationary => quasi_stationary_distribution(q),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  fn two_state_category() -> RateCategory {
    RateCategory::new(
      ["0", "1"],
      vec![
        vec![RateExpr::Const(0.0), RateExpr::param("up")],
        vec![RateExpr::param("down"), RateExpr::Const(0.0)],
      ],
      FreqStrategy::Stationary,
    )
    .unwrap()
  }

  #[rstest]
  fn builds_numeric_generator() {
    let category = two_state_category();
    let params = Parameters::new().with_value("up", 2.0).with_value("down", 1.0);
    let q = category.build_q(&params, &mut HashMap::new()).unwrap();
    assert_ulps_eq!(q.matrix(), &array![[-2.0, 2.0], [1.0, -1.0]]);
  }

  #[rstest]
  fn stationary_freqs_follow_the_generator() {
    let category = two_state_category();
    let params = Parameters::new().with_value("up", 2.0).with_value("down", 1.0);
    let mut memo = HashMap::new();
    let q = category.build_q(&params, &mut memo).unwrap();
    let freqs = category.resolve_freqs(&q, &params, &mut memo).unwrap();
    assert_ulps_eq!(freqs, array![1.0 / 3.0, 2.0 / 3.0], epsilon = 1e-9);
  }

  #[rstest]
  fn equation_freqs_are_normalized() {
    let category = RateCategory::new(
      ["a", "b"],
      vec![
        vec![RateExpr::Const(0.0), RateExpr::Const(1.0)],
        vec![RateExpr::Const(1.0), RateExpr::Const(0.0)],
      ],
      FreqStrategy::Equations(vec![RateExpr::Const(3.0), RateExpr::Const(1.0)]),
    )
    .unwrap();
    let params = Parameters::new();
    let mut memo = HashMap::new();
    let q = category.build_q(&params, &mut memo).unwrap();
    let freqs = category.resolve_freqs(&q, &params, &mut memo).unwrap();
    assert_ulps_eq!(freqs, array![0.75, 0.25]);
  }

  #[rstest]
  fn negative_rate_fails_at_build() {
    let category = RateCategory::new(
      ["a", "b"],
      vec![
        vec![RateExpr::Const(0.0), RateExpr::param("rate")],
        vec![RateExpr::param("rate"), RateExpr::Const(0.0)],
      ],
      FreqStrategy::Stationary,
    )
    .unwrap();
    let params = Parameters::new().with_value("rate", -0.5);
    assert!(category.build_q(&params, &mut HashMap::new()).is_err());
  }

  #[rstest]
  fn rejects_shape_mismatches() {
    assert!(RateCategory::new(
      ["a", "b"],
      vec![vec![RateExpr::Const(0.0); 2]],
      FreqStrategy::Stationary
    )
    .is_err());

    assert!(RateCategory::new(
      ["a", "a"],
      vec![vec![RateExpr::Const(0.0); 2]; 2],
      FreqStrategy::Stationary
    )
    .is_err());
  }
}
