use crate::config::EngineConfig;
use crate::likelihood::root::RootPolicy;
use crate::matrix::expm::MatrixExp;
use crate::model::model::Model;
use crate::model::parameters::Parameters;
use crate::tree::tree::{BranchId, Tree};
use crate::{make_error, make_internal_report};
use eyre::{Report, WrapErr};
use getset::{CopyGetters, Getters};
use indexmap::IndexMap;
use log::debug;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::sync::Arc;

/// Numeric tables of one rate category for one parameter assignment
#[derive(Getters, CopyGetters)]
pub struct CategoryTables {
  /// Generator with its per-length transition matrix cache
  expm: MatrixExp,

  /// Root-state frequencies
  #[getset(get = "pub")]
  freqs: Array1<f64>,

  /// Normalized mixture weight
  #[getset(get_copy = "pub")]
  weight: f64,

  /// Transition probability matrix per branch, indexed like the tree's
  /// postorder branch list
  p_matrices: Vec<Arc<Array2<f64>>>,
}

/// Everything the pruning recursion reads for one parameter assignment:
/// per-category transition matrices for every branch, root frequencies and
/// mixture weights, and the state→index map.
///
/// Built once per evaluated parameter point and read-only afterwards, so
/// concurrent per-site tasks need no locking. The per-length caches inside
/// each [`MatrixExp`] are owned here and die with this cache; they are
/// never shared across parameter assignments.
pub struct ProbabilityCache {
  states: Vec<String>,
  state_index: IndexMap<String, usize>,
  tree: Tree,
  categories: Vec<CategoryTables>,
  root_policy: RootPolicy,
}

impl ProbabilityCache {
  pub fn build(model: &Model, tree: &Tree, params: &Parameters, config: &EngineConfig) -> Result<Self, Report> {
    let tree = tree.with_lengths_resolved(params)?;

    // expression results are memoized by literal expression text for the
    // duration of this build; models repeat the same few expressions
    // across many cells
    let mut memo: HashMap<String, f64> = HashMap::new();

    let weights = model.resolve_weights(params, &mut memo)?;

    let mut generators = Vec::with_capacity(model.n_categories());
    for (cat, category) in model.categories().iter().enumerate() {
      let q = category
        .build_q(params, &mut memo)
        .wrap_err_with(|| format!("When building rate matrix of category {cat}"))?;
      let freqs = category
        .resolve_freqs(&q, params, &mut memo)
        .wrap_err_with(|| format!("When resolving root frequencies of category {cat}"))?;
      generators.push((q, freqs));
    }

    // optional global rescaling so the weighted average rate is 1
    if model.normalize_rate() {
      let average_rate: f64 = weights
        .iter()
        .zip(generators.iter())
        .map(|(&w, (q, freqs))| {
          let category_rate: f64 = freqs
            .iter()
            .zip(q.matrix().diag().iter())
            .map(|(&f, &qii)| f * -qii)
            .sum();
          w * category_rate
        })
        .sum();
      if !(average_rate.is_finite() && average_rate > 0.0) {
        return make_error!("Cannot normalize substitution rate: weighted average rate is {average_rate}");
      }
      debug!("Normalizing substitution rate by 1/{average_rate}");
      for (q, _) in &mut generators {
        *q = q.scaled(1.0 / average_rate);
      }
    }

    let categories = weights
      .into_iter()
      .zip(generators)
      .map(|(weight, (q, freqs))| {
        let expm = MatrixExp::new(q, config.mat_exp);
        let p_matrices = tree
          .branches()
          .iter()
          .map(|branch| {
            let length = branch
              .length()
              .ok_or_else(|| make_internal_report!("Branch length missing after resolution"))?;
            expm
              .expm(length)
              .wrap_err_with(|| format!("When computing transition probabilities above node '{}'", tree.name(branch.child())))
          })
          .collect::<Result<Vec<_>, Report>>()?;
        Ok(CategoryTables {
          expm,
          freqs,
          weight,
          p_matrices,
        })
      })
      .collect::<Result<Vec<_>, Report>>()?;

    Ok(Self {
      states: model.states().to_vec(),
      state_index: model
        .states()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), i))
        .collect(),
      tree,
      categories,
      root_policy: model.root_policy(),
    })
  }

  #[inline]
  pub fn n_states(&self) -> usize {
    self.states.len()
  }

  #[inline]
  pub fn n_categories(&self) -> usize {
    self.categories.len()
  }

  pub fn states(&self) -> &[String] {
    &self.states
  }

  pub const fn state_index_map(&self) -> &IndexMap<String, usize> {
    &self.state_index
  }

  pub fn state_index(&self, token: &str) -> Option<usize> {
    self.state_index.get(token).copied()
  }

  pub fn state_token(&self, index: usize) -> &str {
    &self.states[index]
  }

  /// Tree with all branch lengths resolved
  pub const fn tree(&self) -> &Tree {
    &self.tree
  }

  pub const fn root_policy(&self) -> RootPolicy {
    self.root_policy
  }

  /// Transition probability matrix P[parent state, child state] for one
  /// branch under one category
  pub fn p(&self, category: usize, branch: BranchId) -> &Array2<f64> {
    &self.categories[category].p_matrices[branch]
  }

  pub fn freqs(&self, category: usize) -> &Array1<f64> {
    self.categories[category].freqs()
  }

  pub fn weight(&self, category: usize) -> f64 {
    self.categories[category].weight()
  }

  /// Root frequencies as exposed by the root policy (an error for
  /// policies that derive them from the data)
  pub fn root_freqs(&self, category: usize) -> Result<&Array1<f64>, Report> {
    self.root_policy.freqs(self.categories[category].freqs())
  }

  /// Transition probabilities for an arbitrary length under one category,
  /// served from the per-length cache. Line searches that move a single
  /// branch length hit this cache for every length already seen.
  pub fn transition(&self, category: usize, length: f64) -> Result<Arc<Array2<f64>>, Report> {
    self.categories[category].expm.expm(length)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::model::Model;
  use crate::pretty_assert_ulps_eq;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  fn jc2() -> Model {
    Model::jukes_cantor(&["0", "1"]).unwrap()
  }

  fn two_leaf_tree() -> Tree {
    Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap()
  }

  #[rstest]
  fn builds_per_branch_transition_matrices() {
    let cache = ProbabilityCache::build(&jc2(), &two_leaf_tree(), &Parameters::new(), &EngineConfig::default()).unwrap();

    assert_eq!(cache.n_categories(), 1);
    assert_ulps_eq!(cache.weight(0), 1.0);
    pretty_assert_ulps_eq!(cache.freqs(0), &array![0.5, 0.5], epsilon = 1e-9);

    // symmetric two-state generator normalized to unit rate: P(same) =
    // (1 + exp(-2t)) / 2
    for (branch_id, branch) in cache.tree().branches().iter().enumerate() {
      let t = branch.length().unwrap();
      let expected = (1.0 + (-2.0 * t).exp()) / 2.0;
      assert_ulps_eq!(cache.p(0, branch_id)[[0, 0]], expected, epsilon = 1e-9);
      assert_ulps_eq!(cache.p(0, branch_id)[[0, 1]], 1.0 - expected, epsilon = 1e-9);
    }
  }

  #[rstest]
  fn repeated_lengths_reuse_cached_matrices() {
    let tree = Tree::new([("root", "x", Some(0.25)), ("root", "y", Some(0.25))]).unwrap();
    let cache = ProbabilityCache::build(&jc2(), &tree, &Parameters::new(), &EngineConfig::default()).unwrap();
    assert!(Arc::ptr_eq(
      &cache.categories[0].p_matrices[0],
      &cache.categories[0].p_matrices[1]
    ));

    // ad-hoc lookups for a length already seen return the cached matrix
    let adhoc = cache.transition(0, 0.25).unwrap();
    assert!(Arc::ptr_eq(&adhoc, &cache.categories[0].p_matrices[0]));
  }

  #[rstest]
  fn missing_branch_length_fails_eagerly() {
    let tree = Tree::new([("root", "x", None), ("root", "y", Some(0.5))]).unwrap();
    let result = ProbabilityCache::build(&jc2(), &tree, &Parameters::new(), &EngineConfig::default());
    assert!(result.is_err());
  }
}
