use crate::alignment::alignment::Alignment;
use crate::alignment::ambiguity::Ambiguity;
use crate::alignment::site::Site;
use crate::ancestral::assignment::Assignment;
use crate::ancestral::{assignments_to_alignment, unique_site_keys};
use crate::config::{EngineConfig, ScalarKind};
use crate::likelihood::prob_cache::ProbabilityCache;
use crate::likelihood::pruning::validate_single_class;
use crate::make_error;
use crate::model::model::Model;
use crate::model::parameters::Parameters;
use crate::scalar::scalar::Scalar;
use crate::scalar::scaled::ScaledFloat;
use crate::tree::tree::Tree;
use eyre::Report;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Typed failure so mixture-model callers can recognize it through an
/// `eyre::Report` and fall back to the branch-and-bound reconstructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultipleRateCategories {
  pub n_categories: usize,
}

impl Display for MultipleRateCategories {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Exact dynamic-programming reconstruction requires a single rate category, but the model has {}",
      self.n_categories
    )
  }
}

impl std::error::Error for MultipleRateCategories {}

/// Exact joint maximum-likelihood ancestral reconstruction for
/// single-rate-category models (Pupko 2000): the pruning recursion with
/// max-product in place of sum-product, followed by a root-to-leaves
/// traceback.
pub struct JointDp {
  model: Model,
  tree: Tree,
  alignment: Alignment,
  ambiguity: Ambiguity,
  config: EngineConfig,
  pool: Arc<rayon::ThreadPool>,
}

impl JointDp {
  pub fn new(
    model: Model,
    tree: Tree,
    alignment: Alignment,
    ambiguity: Ambiguity,
    config: EngineConfig,
  ) -> Result<Self, Report> {
    if model.n_categories() != 1 {
      return Err(Report::new(MultipleRateCategories {
        n_categories: model.n_categories(),
      }));
    }
    validate_single_class(&alignment, &tree)?;
    let pool = Arc::new(config.build_pool()?);

    Ok(Self {
      model,
      tree,
      alignment,
      ambiguity,
      config,
      pool,
    })
  }

  /// Most probable joint assignment of states to all internal nodes, as
  /// an alignment whose leaf columns equal the input observations
  pub fn reconstruct(&self, params: &Parameters) -> Result<Alignment, Report> {
    match self.config.scalar {
      ScalarKind::Plain => self.reconstruct_generic::<f64>(params),
      ScalarKind::Scaled => self.reconstruct_generic::<ScaledFloat>(params),
    }
  }

  fn reconstruct_generic<S: Scalar>(&self, params: &Parameters) -> Result<Alignment, Report> {
    let cache = ProbabilityCache::build(&self.model, &self.tree, params, &self.config)?;

    let keys = unique_site_keys(&self.alignment);
    let assignments = self.pool.install(|| {
      keys
        .par_iter()
        .map(|(_, site)| dp_site_assignment::<S>(site, &cache, &self.ambiguity, 0))
        .collect::<Result<Vec<_>, Report>>()
    })?;

    let per_site: IndexMap<(Option<String>, Site), Assignment> = keys.into_iter().zip(assignments).collect();
    assignments_to_alignment(&self.alignment, &cache, &per_site)
  }
}

/// Max-product dynamic program for one site under one category.
///
/// Postorder: for every non-root node `z` and every state `i` of its
/// parent, `L[z][i] = max_j P[i,j]·Π_children L[child][j]` with `C[z][i]`
/// the maximizing `j`. At the root the state maximizing
/// `freq[j]·Π_children L[child][j]` wins; the traceback assigns each node
/// the `C` entry recorded for its parent's chosen state. Ties resolve to
/// the lowest state index.
pub(crate) fn dp_site_assignment<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  category: usize,
) -> Result<Assignment, Report> {
  let tree = cache.tree();
  let n_states = cache.n_states();

  // Π over children of L[child][j]; leaves hold the indicator of their
  // observed state
  let mut subtree_max: Vec<Vec<S>> = vec![vec![S::one(); n_states]; tree.num_nodes()];
  let mut l_table: Vec<Vec<S>> = vec![vec![]; tree.num_nodes()];
  let mut c_table: Vec<Vec<usize>> = vec![vec![]; tree.num_nodes()];

  for &leaf in tree.leaves() {
    let name = tree.name(leaf);
    let token = site.state(name)?;
    let resolved = ambiguity.resolve(token);
    let [single] = resolved.as_slice() else {
      return make_error!(
        "Taxon '{name}' observes ambiguous token '{token}'; exact joint reconstruction requires unambiguous observations"
      );
    };
    let Some(observed) = cache.state_index(single) else {
      return make_error!("Taxon '{name}' observes '{token}', which matches no state of the model");
    };

    let mut indicator = vec![S::zero(); n_states];
    indicator[observed] = S::one();
    subtree_max[leaf] = indicator;
  }

  for &node in tree.postorder_nodes() {
    let Some(branch_id) = tree.branch_above(node) else {
      continue; // root handled below
    };
    let p = cache.p(category, branch_id);
    let parent = tree.branches()[branch_id].parent();

    let mut l_row = vec![S::zero(); n_states];
    let mut c_row = vec![0_usize; n_states];
    for parent_state in 0..n_states {
      let mut best_state = 0;
      let mut best = subtree_max[node][0] * S::from_f64(p[[parent_state, 0]]);
      for state in 1..n_states {
        let value = subtree_max[node][state] * S::from_f64(p[[parent_state, state]]);
        if value.gt(best) {
          best = value;
          best_state = state;
        }
      }
      l_row[parent_state] = best;
      c_row[parent_state] = best_state;
    }

    for state in 0..n_states {
      subtree_max[parent][state] = subtree_max[parent][state] * l_row[state];
    }
    l_table[node] = l_row;
    c_table[node] = c_row;
  }

  let freqs = cache.freqs(category);
  let root = tree.root();
  let mut root_state = 0;
  let mut best = subtree_max[root][0] * S::from_f64(freqs[0]);
  for state in 1..n_states {
    let value = subtree_max[root][state] * S::from_f64(freqs[state]);
    if value.gt(best) {
      best = value;
      root_state = state;
    }
  }
  if best.is_zero() {
    return make_error!("Site has zero likelihood under every root state; no ancestral assignment exists");
  }

  // root-to-leaves traceback (reversed postorder puts parents first)
  let mut chosen = vec![0_usize; tree.num_nodes()];
  let mut assignment = Assignment::new();
  chosen[root] = root_state;
  assignment.assign(tree.name(root), root_state);

  for &node in tree.postorder_nodes().iter().rev() {
    if node == root {
      continue;
    }
    let parent = tree.parent(node).expect("non-root node has a parent");
    chosen[node] = c_table[node][chosen[parent]];
    if !tree.is_leaf(node) {
      assignment.assign(tree.name(node), chosen[node]);
    }
  }

  Ok(assignment)
}
