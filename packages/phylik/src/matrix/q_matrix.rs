use crate::make_error;
use eyre::Report;
use ndarray::{Array2, Axis};

/// Validated continuous-time Markov generator: square, finite, nonnegative
/// off-diagonal rates, diagonal = negative off-diagonal row sum (rows sum
/// to zero).
#[derive(Clone, Debug)]
pub struct QMatrix {
  matrix: Array2<f64>,
}

impl QMatrix {
  /// Build a generator from a matrix of rates. The diagonal of the input
  /// is ignored and replaced by the negative row sum of the off-diagonal
  /// entries.
  pub fn from_rates(rates: Array2<f64>) -> Result<Self, Report> {
    let n = rates.nrows();
    if rates.ncols() != n {
      return make_error!(
        "Rate matrix must be square, but found dimensions {}x{}",
        rates.nrows(),
        rates.ncols()
      );
    }
    if n == 0 {
      return make_error!("Rate matrix must not be empty");
    }

    for ((i, j), &rate) in rates.indexed_iter() {
      if i != j && !(rate.is_finite() && rate >= 0.0) {
        return make_error!("Off-diagonal rate at ({i}, {j}) must be finite and nonnegative, but found {rate}");
      }
    }

    let mut matrix = rates;
    matrix.diag_mut().fill(0.0);
    let diag = -matrix.sum_axis(Axis(1));
    matrix.diag_mut().assign(&diag);

    Ok(Self { matrix })
  }

  #[inline]
  pub fn n_states(&self) -> usize {
    self.matrix.nrows()
  }

  #[inline]
  pub const fn matrix(&self) -> &Array2<f64> {
    &self.matrix
  }

  /// Multiply every rate by a positive factor (used to normalize the
  /// average substitution rate of a mixture to 1)
  pub fn scaled(&self, factor: f64) -> Self {
    Self {
      matrix: &self.matrix * factor,
    }
  }

  /// States whose off-diagonal rates are all zero (no escape possible)
  pub fn absorbing_states(&self) -> Vec<usize> {
    self
      .matrix
      .rows()
      .into_iter()
      .enumerate()
      .filter(|(i, row)| row.iter().enumerate().all(|(j, &rate)| *i == j || rate == 0.0))
      .map(|(i, _)| i)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  #[rstest]
  fn assembles_diagonal_from_row_sums() {
    let q = QMatrix::from_rates(array![[99.0, 1.0, 2.0], [3.0, 99.0, 4.0], [0.0, 0.0, 99.0]]).unwrap();
    assert_ulps_eq!(q.matrix().diag().to_owned(), array![-3.0, -7.0, 0.0]);
    assert_ulps_eq!(q.matrix().sum_axis(ndarray::Axis(1)), array![0.0, 0.0, 0.0]);
  }

  #[rstest]
  fn rejects_negative_rates() {
    assert!(QMatrix::from_rates(array![[0.0, -1.0], [1.0, 0.0]]).is_err());
  }

  #[rstest]
  fn rejects_non_square() {
    assert!(QMatrix::from_rates(array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0]]).is_err());
  }

  #[rstest]
  fn finds_absorbing_states() {
    let q = QMatrix::from_rates(array![[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 0.0]]).unwrap();
    assert_eq!(q.absorbing_states(), vec![2]);
  }
}
