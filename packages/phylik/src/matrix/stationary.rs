use crate::constants::{STATIONARY_MAX_ITER, STATIONARY_TOL};
use crate::{make_error, make_report};
use crate::matrix::q_matrix::QMatrix;
use crate::utils::ndarray::{clamp_min, normalize_in_place};
use eyre::Report;
use log::debug;
use ndarray::{Array1, Array2};
use ndarray_linalg::Eig;

/// Distribution π with πQ = 0 and Σπ = 1. Tries the eigenvector method
/// first and falls back to repeated application of a uniformized step
/// matrix if the decomposition fails.
pub fn stationary_distribution(q: &QMatrix) -> Result<Array1<f64>, Report> {
  match stationary_eigen(q) {
    Ok(pi) => Ok(pi),
    Err(err) => {
      debug!("Stationary distribution via eigenvectors failed ({err}), retrying iteratively");
      stationary_iterative(q)
    }
  }
}

/// Left null vector of Q, found as the right eigenvector of Qᵀ whose
/// eigenvalue is closest to zero
pub fn stationary_eigen(q: &QMatrix) -> Result<Array1<f64>, Report> {
  let qt = q.matrix().t().to_owned();
  let (eigvals, v) = qt
    .eig()
    .map_err(|err| make_report!("Eigendecomposition of transposed rate matrix did not converge: {err}"))?;

  let (idx, _) = eigvals
    .iter()
    .enumerate()
    .min_by(|(_, a), (_, b)| a.norm().total_cmp(&b.norm()))
    .expect("rate matrix has at least one eigenvalue");

  let mut pi = v.column(idx).mapv(|z| z.re);
  if pi.sum() < 0.0 {
    pi = -pi;
  }
  let mut pi = clamp_min(&pi, 0.0);
  let norm = normalize_in_place(&mut pi);
  if norm <= 0.0 {
    return make_error!("Null eigenvector of rate matrix is degenerate; cannot derive stationary frequencies");
  }

  let residual = pi
    .dot(q.matrix())
    .iter()
    .fold(0.0_f64, |acc, &x| acc.max(x.abs()));
  if residual > 1e-8 {
    return make_error!("Candidate stationary distribution does not satisfy piQ = 0 (residual {residual:.3e})");
  }

  Ok(pi)
}

/// Repeated application of the uniformized step matrix I + Q·dt, starting
/// from the uniform distribution, until the change per step drops below
/// tolerance. Exceeding the iteration budget is a numeric error.
pub fn stationary_iterative(q: &QMatrix) -> Result<Array1<f64>, Report> {
  let n = q.n_states();
  let dmax = q
    .matrix()
    .diag()
    .iter()
    .fold(0.0_f64, |acc, &x| acc.max(x.abs()));
  if dmax == 0.0 {
    // every state is absorbing, any distribution is stationary
    return Ok(Array1::from_elem(n, 1.0 / n as f64));
  }

  let dt = 0.9 / dmax;
  let step: Array2<f64> = Array2::eye(n) + &(q.matrix() * dt);

  let mut pi = Array1::from_elem(n, 1.0 / n as f64);
  for _ in 0..STATIONARY_MAX_ITER {
    let next = pi.dot(&step);
    let diff = (&next - &pi).mapv(f64::abs).sum();
    pi = next;
    if diff < STATIONARY_TOL {
      return Ok(pi);
    }
  }

  make_error!("Stationary distribution did not converge within {STATIONARY_MAX_ITER} iterations")
}

/// Limiting state distribution conditional on non-absorption, for
/// generators with absorbing states (birth-death-type processes). Zeros at
/// absorbing states. Without absorbing states this is the plain stationary
/// distribution.
pub fn quasi_stationary_distribution(q: &QMatrix) -> Result<Array1<f64>, Report> {
  let absorbing = q.absorbing_states();
  if absorbing.is_empty() {
    return stationary_distribution(q);
  }

  match quasi_stationary_eigen(q, &absorbing) {
    Ok(pi) => Ok(pi),
    Err(err) => {
      debug!("Quasi-stationary distribution via eigenvectors failed ({err}), retrying iteratively");
      quasi_stationary_iterative(q, &absorbing)
    }
  }
}

fn transient_states(q: &QMatrix, absorbing: &[usize]) -> Vec<usize> {
  (0..q.n_states()).filter(|i| !absorbing.contains(i)).collect()
}

fn transient_block(q: &QMatrix, keep: &[usize]) -> Array2<f64> {
  Array2::from_shape_fn((keep.len(), keep.len()), |(i, j)| q.matrix()[[keep[i], keep[j]]])
}

fn scatter(full_len: usize, keep: &[usize], values: &Array1<f64>) -> Array1<f64> {
  let mut out = Array1::zeros(full_len);
  for (i, &state) in keep.iter().enumerate() {
    out[state] = values[i];
  }
  out
}

/// Dominant left eigenvector of the transient block of Q
fn quasi_stationary_eigen(q: &QMatrix, absorbing: &[usize]) -> Result<Array1<f64>, Report> {
  let keep = transient_states(q, absorbing);
  if keep.is_empty() {
    return make_error!("Rate matrix has no transient states; quasi-stationary distribution is undefined");
  }

  let block = transient_block(q, &keep);
  let (eigvals, v) = block.t().to_owned().eig().map_err(|err| {
    make_report!("Eigendecomposition of transient block did not converge: {err}")
  })?;

  let (idx, _) = eigvals
    .iter()
    .enumerate()
    .max_by(|(_, a), (_, b)| a.re.total_cmp(&b.re))
    .expect("transient block has at least one eigenvalue");

  let mut pi = v.column(idx).mapv(|z| z.re);
  if pi.sum() < 0.0 {
    pi = -pi;
  }
  let mut pi = clamp_min(&pi, 0.0);
  let norm = normalize_in_place(&mut pi);
  if norm <= 0.0 {
    return make_error!("Dominant eigenvector of transient block is degenerate");
  }

  Ok(scatter(q.n_states(), &keep, &pi))
}

/// Repeated application over the transient block with renormalization
/// after every step (the block leaks probability into absorbing states)
fn quasi_stationary_iterative(q: &QMatrix, absorbing: &[usize]) -> Result<Array1<f64>, Report> {
  let keep = transient_states(q, absorbing);
  if keep.is_empty() {
    return make_error!("Rate matrix has no transient states; quasi-stationary distribution is undefined");
  }

  let block = transient_block(q, &keep);
  let dmax = block.diag().iter().fold(0.0_f64, |acc, &x| acc.max(x.abs()));
  if dmax == 0.0 {
    return make_error!("Transient block of rate matrix is zero; quasi-stationary distribution is undefined");
  }

  let dt = 0.9 / dmax;
  let step: Array2<f64> = Array2::eye(keep.len()) + &(&block * dt);

  let mut pi = Array1::from_elem(keep.len(), 1.0 / keep.len() as f64);
  for _ in 0..STATIONARY_MAX_ITER {
    let mut next = pi.dot(&step);
    let norm = normalize_in_place(&mut next);
    if norm <= 0.0 {
      return make_error!("Quasi-stationary iteration lost all probability mass");
    }
    let diff = (&next - &pi).mapv(f64::abs).sum();
    pi = next;
    if diff < STATIONARY_TOL {
      return Ok(scatter(q.n_states(), &keep, &pi));
    }
  }

  make_error!("Quasi-stationary distribution did not converge within {STATIONARY_MAX_ITER} iterations")
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rstest::rstest;

  #[rstest]
  fn uniform_for_symmetric_exchange() {
    let q = QMatrix::from_rates(array![[0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]]).unwrap();
    let pi = stationary_distribution(&q).unwrap();
    assert_abs_diff_eq!(pi, array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], epsilon = 1e-10);
  }

  #[rstest]
  fn eigen_and_iterative_agree_for_asymmetric_rates() {
    let q = QMatrix::from_rates(array![[0.0, 2.0], [1.0, 0.0]]).unwrap();
    let eig = stationary_eigen(&q).unwrap();
    let iter = stationary_iterative(&q).unwrap();
    assert_abs_diff_eq!(eig, array![1.0 / 3.0, 2.0 / 3.0], epsilon = 1e-9);
    assert_abs_diff_eq!(iter, array![1.0 / 3.0, 2.0 / 3.0], epsilon = 1e-6);
  }

  #[rstest]
  fn quasi_stationary_conditions_on_survival() {
    // state 2 is absorbing; the conditional distribution lives on {0, 1}
    let q = QMatrix::from_rates(array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.5], [0.0, 0.0, 0.0]]).unwrap();
    let pi = quasi_stationary_distribution(&q).unwrap();

    assert_abs_diff_eq!(pi.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(pi[2], 0.0, epsilon = 0.0);
    // state 1 leaks into the absorbing state, so survival favors state 0
    assert!(pi[0] > pi[1]);

    let absorbing = q.absorbing_states();
    let iter = quasi_stationary_iterative(&q, &absorbing).unwrap();
    assert_abs_diff_eq!(pi, iter, epsilon = 1e-5);
  }

  #[rstest]
  fn quasi_stationary_without_absorption_is_stationary() {
    let q = QMatrix::from_rates(array![[0.0, 2.0], [1.0, 0.0]]).unwrap();
    let qsd = quasi_stationary_distribution(&q).unwrap();
    let pi = stationary_distribution(&q).unwrap();
    assert_abs_diff_eq!(qsd, pi, epsilon = 1e-9);
  }
}
