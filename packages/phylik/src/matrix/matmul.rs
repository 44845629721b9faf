use crate::constants::MATMUL_PAR_THRESHOLD;
use ndarray::{Array2, Zip};

/// Matrix product, row-parallel above [`MATMUL_PAR_THRESHOLD`].
///
/// For small state spaces (2-4 states for nucleotide models) the dispatch
/// overhead of the worker pool exceeds the benefit, so those run
/// single-threaded.
pub fn matmul(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
  assert_eq!(a.ncols(), b.nrows(), "matmul: incompatible dimensions");

  if a.nrows() < MATMUL_PAR_THRESHOLD {
    return a.dot(b);
  }

  let mut out = Array2::<f64>::zeros((a.nrows(), b.ncols()));
  Zip::from(out.rows_mut())
    .and(a.rows())
    .par_for_each(|mut out_row, a_row| {
      out_row.assign(&a_row.dot(b));
    });
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use ndarray::{array, Array};

  #[test]
  fn matches_dot_for_small_matrices() {
    let a = array![[1.0, 2.0], [3.0, 4.0]];
    let b = array![[5.0, 6.0], [7.0, 8.0]];
    assert_ulps_eq!(matmul(&a, &b), a.dot(&b));
  }

  #[test]
  fn matches_dot_above_parallel_threshold() {
    let n = MATMUL_PAR_THRESHOLD + 7;
    let a = Array::from_shape_fn((n, n), |(i, j)| ((i * 31 + j * 7) % 13) as f64 / 13.0);
    let b = Array::from_shape_fn((n, n), |(i, j)| ((i * 17 + j * 3) % 11) as f64 / 11.0);
    assert_ulps_eq!(matmul(&a, &b), a.dot(&b), epsilon = 1e-12);
  }
}
