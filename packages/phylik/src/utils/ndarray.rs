use ndarray::{Array, Array1, Array2, Axis, Dimension};

/// Clamp each element to at least `lower`
pub fn clamp_min<T: Copy + PartialOrd, D: Dimension>(a: &Array<T, D>, lower: T) -> Array<T, D> {
  a.mapv(|x| num_traits::clamp_min(x, lower))
}

/// Matrix 1-norm: maximum absolute column sum
pub fn one_norm(a: &Array2<f64>) -> f64 {
  a.map_axis(Axis(0), |col| col.mapv(f64::abs).sum())
    .fold(0.0, |acc, &x| acc.max(x))
}

/// Normalize a nonnegative vector so its entries sum to 1.
/// Returns the normalization constant (the original sum).
pub fn normalize_in_place(v: &mut Array1<f64>) -> f64 {
  let sum = v.sum();
  if sum > 0.0 {
    *v /= sum;
  }
  sum
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  #[rstest]
  fn computes_one_norm() {
    let a = array![[1.0, -2.0], [3.0, 4.0]];
    assert_ulps_eq!(one_norm(&a), 6.0);
  }

  #[rstest]
  fn clamps_min() {
    let a = array![[-1.0, 2.0], [0.5, -0.25]];
    assert_eq!(clamp_min(&a, 0.0), array![[0.0, 2.0], [0.5, 0.0]]);
  }

  #[rstest]
  fn normalizes_to_unit_sum() {
    let mut v = array![1.0, 3.0];
    let norm = normalize_in_place(&mut v);
    assert_ulps_eq!(norm, 4.0);
    assert_ulps_eq!(v, array![0.25, 0.75]);
  }
}
