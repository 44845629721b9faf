use crate::config::MatExpMethod;
use crate::constants::TAYLOR_SERIES_ORDER;
use crate::matrix::matmul::matmul;
use crate::matrix::q_matrix::QMatrix;
use crate::utils::ndarray::{clamp_min, one_norm};
use crate::{make_error, make_report};
use eyre::Report;
use ndarray::{Array1, Array2};
use ndarray_linalg::{c64, Eig, Inverse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Eigendecomposition of a generator, kept in the complex plane since
/// non-reversible generators need not have real spectra
struct EigenBasis {
  eigvals: Array1<c64>,
  v: Array2<c64>,
  v_inv: Array2<c64>,
}

/// Computes transition probability matrices P(t) = exp(Q·t) for one
/// generator, with per-length result caching.
///
/// Both the cached powers of Q (Taylor) and the cached eigendecomposition
/// (Eigen) are computed lazily on first use and are independent of t, so
/// repeated evaluations along a branch-length line search cost one matrix
/// build each and O(1) afterwards.
pub struct MatrixExp {
  q: QMatrix,
  method: MatExpMethod,
  powers: OnceLock<Vec<Array2<f64>>>,
  eigen: OnceLock<Result<EigenBasis, String>>,
  cache: RwLock<HashMap<u64, Arc<Array2<f64>>>>,
}

impl MatrixExp {
  pub fn new(q: QMatrix, method: MatExpMethod) -> Self {
    Self {
      q,
      method,
      powers: OnceLock::new(),
      eigen: OnceLock::new(),
      cache: RwLock::new(HashMap::new()),
    }
  }

  #[inline]
  pub const fn q(&self) -> &QMatrix {
    &self.q
  }

  #[inline]
  pub fn n_states(&self) -> usize {
    self.q.n_states()
  }

  /// Transition probability matrix after time t
  pub fn expm(&self, t: f64) -> Result<Arc<Array2<f64>>, Report> {
    if !t.is_finite() || t < 0.0 {
      return make_error!("Branch length must be finite and nonnegative, but found {t}");
    }

    if t == 0.0 {
      return Ok(Arc::new(Array2::eye(self.n_states())));
    }

    if let Some(cached) = self.cache.read().get(&t.to_bits()) {
      return Ok(Arc::clone(cached));
    }

    let result = match self.method {
      MatExpMethod::Taylor { min_squarings } => self.expm_taylor(t, min_squarings),
      MatExpMethod::Eigen => self.expm_eigen(t)?,
    };

    let result = Arc::new(result);
    self.cache.write().insert(t.to_bits(), Arc::clone(&result));
    Ok(result)
  }

  /// Powers Q^0 .. Q^ORDER, computed once per generator. They do not
  /// depend on t: the series term (Q·s)^n/n! is recovered by rescaling
  /// with s^n/n!.
  fn powers(&self) -> &[Array2<f64>] {
    self.powers.get_or_init(|| {
      let mut powers = Vec::with_capacity(TAYLOR_SERIES_ORDER + 1);
      powers.push(Array2::eye(self.n_states()));
      for i in 1..=TAYLOR_SERIES_ORDER {
        let next = matmul(&powers[i - 1], self.q.matrix());
        powers.push(next);
      }
      powers
    })
  }

  /// Scaling-and-squaring truncated power series: scale Q·t down until its
  /// column-sum norm is at most 1, sum the truncated series from the
  /// cached powers, then square the result back up.
  fn expm_taylor(&self, t: f64, min_squarings: usize) -> Array2<f64> {
    let norm = one_norm(self.q.matrix()) * t;
    let mut squarings = min_squarings;
    while norm / (squarings as f64).exp2() > 1.0 {
      squarings += 1;
    }

    let s = t / (squarings as f64).exp2();

    let mut sum = Array2::<f64>::zeros((self.n_states(), self.n_states()));
    let mut coeff = 1.0;
    for (i, power) in self.powers().iter().enumerate() {
      if i > 0 {
        coeff *= s / (i as f64);
      }
      sum.scaled_add(coeff, power);
    }

    let mut result = sum;
    for _ in 0..squarings {
      result = matmul(&result, &result);
    }

    clamp_min(&result, 0.0)
  }

  fn eigen(&self) -> Result<&EigenBasis, Report> {
    self
      .eigen
      .get_or_init(|| {
        let (eigvals, v) = self
          .q
          .matrix()
          .eig()
          .map_err(|err| format!("Eigendecomposition of rate matrix did not converge: {err}"))?;
        let v_inv = v
          .inv()
          .map_err(|err| format!("Eigenvector matrix of rate matrix is singular: {err}"))?;
        Ok(EigenBasis { eigvals, v, v_inv })
      })
      .as_ref()
      .map_err(|msg| make_report!("{msg}"))
  }

  /// P(t) = V·exp(D·t)·V⁻¹ from the cached eigendecomposition
  fn expm_eigen(&self, t: f64) -> Result<Array2<f64>, Report> {
    let basis = self.eigen()?;

    let exp_dt = basis.eigvals.mapv(|lambda| (lambda * t).exp());

    let mut v_scaled = basis.v.clone();
    for (j, &e) in exp_dt.iter().enumerate() {
      v_scaled.column_mut(j).mapv_inplace(|x| x * e);
    }

    let p = v_scaled.dot(&basis.v_inv).mapv(|z| z.re);
    Ok(clamp_min(&p, 0.0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rstest::rstest;

  fn q3() -> QMatrix {
    QMatrix::from_rates(array![[0.0, 1.0, 2.0], [0.5, 0.0, 0.3], [0.2, 0.7, 0.0]]).unwrap()
  }

  #[rstest]
  fn zero_length_is_identity() {
    for method in [MatExpMethod::Taylor { min_squarings: 0 }, MatExpMethod::Eigen] {
      let expm = MatrixExp::new(q3(), method);
      let p = expm.expm(0.0).unwrap();
      assert_abs_diff_eq!(&*p, &Array2::eye(3), epsilon = 0.0);
    }
  }

  #[rstest]
  fn rejects_negative_and_non_finite_lengths() {
    let expm = MatrixExp::new(q3(), MatExpMethod::default());
    assert!(expm.expm(-0.1).is_err());
    assert!(expm.expm(f64::NAN).is_err());
    assert!(expm.expm(f64::INFINITY).is_err());
  }

  #[rstest]
  #[case(0.01)]
  #[case(0.3)]
  #[case(2.5)]
  #[case(17.0)]
  fn taylor_and_eigen_agree(#[case] t: f64) {
    let taylor = MatrixExp::new(q3(), MatExpMethod::Taylor { min_squarings: 0 });
    let eigen = MatrixExp::new(q3(), MatExpMethod::Eigen);
    let p_taylor = taylor.expm(t).unwrap();
    let p_eigen = eigen.expm(t).unwrap();
    assert_abs_diff_eq!(&*p_taylor, &*p_eigen, epsilon = 1e-8);
  }

  #[rstest]
  #[case(0.0)]
  #[case(0.05)]
  #[case(1.0)]
  #[case(42.0)]
  fn rows_sum_to_one(#[case] t: f64) {
    for method in [MatExpMethod::Taylor { min_squarings: 0 }, MatExpMethod::Eigen] {
      let expm = MatrixExp::new(q3(), method);
      let p = expm.expm(t).unwrap();
      for row in p.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
      }
    }
  }

  #[rstest]
  fn two_state_symmetric_converges_to_uniform() {
    let q = QMatrix::from_rates(array![[0.0, 1.0], [1.0, 0.0]]).unwrap();
    for method in [MatExpMethod::Taylor { min_squarings: 0 }, MatExpMethod::Eigen] {
      let expm = MatrixExp::new(q.clone(), method);
      let p = expm.expm(50.0).unwrap();
      assert_abs_diff_eq!(&*p, &array![[0.5, 0.5], [0.5, 0.5]], epsilon = 1e-12);
    }
  }

  #[rstest]
  fn forced_minimum_squarings_matches_default() {
    let default = MatrixExp::new(q3(), MatExpMethod::Taylor { min_squarings: 0 });
    let forced = MatrixExp::new(q3(), MatExpMethod::Taylor { min_squarings: 6 });
    let p_default = default.expm(0.2).unwrap();
    let p_forced = forced.expm(0.2).unwrap();
    assert_abs_diff_eq!(&*p_default, &*p_forced, epsilon = 1e-10);
  }

  #[rstest]
  fn caches_by_branch_length() {
    let expm = MatrixExp::new(q3(), MatExpMethod::default());
    let first = expm.expm(0.7).unwrap();
    let second = expm.expm(0.7).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
  }
}
