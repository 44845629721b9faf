use crate::alignment::ambiguity::Ambiguity;
use crate::make_error;
use crate::scalar::scalar::Scalar;
use eyre::Report;
use indexmap::IndexMap;

/// Per-state partial likelihood vector of one node: entry `s` holds the
/// likelihood of the node's subtree data given state `s` at the node.
#[derive(Clone, Debug)]
pub struct NodeLikelihood<S: Scalar> {
  values: Vec<S>,
}

impl<S: Scalar> NodeLikelihood<S> {
  /// Internal-node seed: every state allowed, multiplied branch-by-branch
  /// afterwards
  pub fn ones(n_states: usize) -> Self {
    Self {
      values: vec![S::one(); n_states],
    }
  }

  /// Internal-node seed restricted to a subset of states (used during
  /// ancestral reconstruction)
  pub fn constrained(n_states: usize, allowed: impl IntoIterator<Item = usize>) -> Self {
    let mut values = vec![S::zero(); n_states];
    for index in allowed {
      values[index] = S::one();
    }
    Self { values }
  }

  /// Leaf seed: 1 for every state consistent with the observed (possibly
  /// ambiguous) token, 0 otherwise. A vector with no nonzero entry means
  /// the observation is outside the model's state set and fails fast.
  pub fn from_observation(
    taxon: &str,
    token: &str,
    ambiguity: &Ambiguity,
    state_index: &IndexMap<String, usize>,
  ) -> Result<Self, Report> {
    let mut values = vec![S::zero(); state_index.len()];
    let mut any = false;
    for resolved in ambiguity.resolve(token) {
      if let Some(&index) = state_index.get(resolved) {
        values[index] = S::one();
        any = true;
      }
    }
    if !any {
      return make_error!("Taxon '{taxon}' observes '{token}', which matches no state of the model");
    }
    Ok(Self { values })
  }

  #[inline]
  pub fn get(&self, state: usize) -> S {
    self.values[state]
  }

  #[inline]
  pub fn mul_assign(&mut self, state: usize, factor: S) {
    self.values[state] = self.values[state] * factor;
  }

  pub fn values(&self) -> &[S] {
    &self.values
  }

  pub fn n_states(&self) -> usize {
    self.values.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use indexmap::indexmap;
  use rstest::rstest;

  fn nuc_index() -> IndexMap<String, usize> {
    indexmap! {
      "A".to_owned() => 0,
      "C".to_owned() => 1,
      "G".to_owned() => 2,
      "T".to_owned() => 3,
    }
  }

  #[rstest]
  fn seeds_unambiguous_observation() {
    let lik = NodeLikelihood::<f64>::from_observation("x", "C", &Ambiguity::nucleotide(), &nuc_index()).unwrap();
    assert_eq!(lik.values(), &[0.0, 1.0, 0.0, 0.0]);
  }

  #[rstest]
  fn seeds_ambiguous_observation() {
    let lik = NodeLikelihood::<f64>::from_observation("x", "R", &Ambiguity::nucleotide(), &nuc_index()).unwrap();
    assert_eq!(lik.values(), &[1.0, 0.0, 1.0, 0.0]);
  }

  #[rstest]
  fn rejects_observation_outside_the_model() {
    let result = NodeLikelihood::<f64>::from_observation("x", "Z", &Ambiguity::nucleotide(), &nuc_index());
    assert!(result.is_err());
  }

  #[rstest]
  fn constrains_internal_states() {
    let lik = NodeLikelihood::<f64>::constrained(4, [2]);
    assert_eq!(lik.values(), &[0.0, 0.0, 1.0, 0.0]);
  }
}
