use crate::alignment::alignment::Alignment;
use crate::alignment::ambiguity::Ambiguity;
use crate::alignment::site::Site;
use crate::config::{EngineConfig, ScalarKind};
use crate::likelihood::constraints::StateConstraints;
use crate::likelihood::prob_cache::ProbabilityCache;
use crate::likelihood::pruning::{fold_branch, seed_partials, validate_single_class};
use crate::model::model::Model;
use crate::{make_error, make_internal_report};
use crate::model::parameters::Parameters;
use crate::scalar::scalar::Scalar;
use crate::scalar::scaled::ScaledFloat;
use crate::tree::tree::{NodeId, Tree};
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::Array1;
use rayon::prelude::*;
use std::sync::Arc;

/// Per-column, per-internal-node posterior state distributions produced by
/// marginal reconstruction
pub struct Posteriors {
  states: Vec<String>,
  columns: Vec<IndexMap<String, Array1<f64>>>,
}

impl Posteriors {
  /// Posterior distribution over states at one internal node for one
  /// original alignment column
  pub fn posterior(&self, column: usize, node: &str) -> Option<&Array1<f64>> {
    self.columns.get(column)?.get(node)
  }

  pub fn states(&self) -> &[String] {
    &self.states
  }

  pub fn n_columns(&self) -> usize {
    self.columns.len()
  }
}

/// Marginal ancestral reconstruction: the posterior state distribution at
/// every internal node, one node at a time, by treating that node as a
/// virtual root.
///
/// Branches off the node's path to the true root run the ordinary
/// sum-product recursion; the true root's frequency vector is multiplied
/// in at the true root; path branches are then traversed root-ward-to-node
/// with start/end states swapped (the time-reversed direction; transition
/// matrices are not symmetric for non-reversible generators). The vector
/// arriving at the node, mixed across rate categories and normalized, is
/// the posterior.
pub struct Marginal {
  model: Model,
  tree: Tree,
  alignment: Alignment,
  ambiguity: Ambiguity,
  config: EngineConfig,
  pool: Arc<rayon::ThreadPool>,
  constraints: StateConstraints,
  class_constraints: IndexMap<String, StateConstraints>,
}

impl Marginal {
  pub fn new(
    model: Model,
    tree: Tree,
    alignment: Alignment,
    ambiguity: Ambiguity,
    config: EngineConfig,
  ) -> Result<Self, Report> {
    validate_single_class(&alignment, &tree)?;
    let pool = Arc::new(config.build_pool()?);

    Ok(Self {
      model,
      tree,
      alignment,
      ambiguity,
      config,
      pool,
      constraints: StateConstraints::unconstrained(),
      class_constraints: IndexMap::new(),
    })
  }

  /// Constraint applied to the internal nodes of every site
  #[must_use]
  pub fn with_constraints(mut self, constraints: StateConstraints) -> Self {
    self.constraints = constraints;
    self
  }

  /// Additional constrainer for sites carrying one class label; it
  /// restricts (intersects) the site-wide constraint
  #[must_use]
  pub fn with_class_constraints(mut self, label: impl Into<String>, constraints: StateConstraints) -> Self {
    self.class_constraints.insert(label.into(), constraints);
    self
  }

  /// Reconstructed alignment (internal nodes take their
  /// maximum-posterior state, lowest state index on ties) plus the full
  /// posterior lookup
  pub fn reconstruct(&self, params: &Parameters) -> Result<(Alignment, Posteriors), Report> {
    match self.config.scalar {
      ScalarKind::Plain => self.reconstruct_generic::<f64>(params),
      ScalarKind::Scaled => self.reconstruct_generic::<ScaledFloat>(params),
    }
  }

  fn constraints_for(&self, label: Option<&str>) -> StateConstraints {
    match label.and_then(|label| self.class_constraints.get(label)) {
      Some(class_constraints) => self.constraints.intersect(class_constraints),
      None => self.constraints.clone(),
    }
  }

  fn reconstruct_generic<S: Scalar>(&self, params: &Parameters) -> Result<(Alignment, Posteriors), Report> {
    let cache = ProbabilityCache::build(&self.model, &self.tree, params, &self.config)?;
    let tree = cache.tree();

    let unique_keys = self.alignment.unique_sites().into_keys().collect_vec();
    let computed = self.pool.install(|| {
      unique_keys
        .par_iter()
        .map(|(label, site)| {
          let constraints = self.constraints_for(label.as_deref());
          marginal_site::<S>(site, &cache, &self.ambiguity, &constraints)
        })
        .collect::<Result<Vec<_>, Report>>()
    })?;

    let per_site: IndexMap<&(Option<String>, Site), &IndexMap<String, Array1<f64>>> =
      unique_keys.iter().zip(computed.iter()).collect();

    let mut columns = Vec::with_capacity(self.alignment.len());
    let mut reconstructed_sites = Vec::with_capacity(self.alignment.len());

    for site in self.alignment.sites() {
      let key = (site.label().map(ToString::to_string), site.clone());
      let posteriors = *per_site
        .get(&key)
        .ok_or_else(|| make_internal_report!("No posterior computed for a site that was part of the input"))?;

      let entries = tree
        .postorder_nodes()
        .iter()
        .map(|&id| {
          let name = tree.name(id);
          let token = if tree.is_leaf(id) {
            site.state(name)?.to_owned()
          } else {
            let posterior = &posteriors[name];
            cache.state_token(argmax_lowest(posterior)).to_owned()
          };
          Ok((name.to_owned(), token))
        })
        .collect::<Result<Vec<_>, Report>>()?;

      reconstructed_sites.push(match site.label() {
        Some(label) => Site::with_label(label, entries),
        None => Site::new(entries),
      });
      columns.push(posteriors.clone());
    }

    let alignment = Alignment::new(reconstructed_sites)?;
    let posteriors = Posteriors {
      states: cache.states().to_vec(),
      columns,
    };
    Ok((alignment, posteriors))
  }
}

/// First index achieving the maximum (the documented tie rule: lowest
/// state index)
fn argmax_lowest(values: &Array1<f64>) -> usize {
  let mut best = 0;
  for (i, &value) in values.iter().enumerate().skip(1) {
    if value > values[best] {
      best = i;
    }
  }
  best
}

/// Posterior distributions at every internal node (the true root
/// included: its path is empty, so only the normal pass applies) for one
/// site
fn marginal_site<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  constraints: &StateConstraints,
) -> Result<IndexMap<String, Array1<f64>>, Report> {
  let tree = cache.tree();
  let n_states = cache.n_states();

  let mut posteriors = IndexMap::with_capacity(tree.internals().len());
  for &node in tree.internals() {
    let path = tree.path_to_root(node);
    let mut on_path = vec![false; tree.branches().len()];
    for &branch_id in &path {
      on_path[branch_id] = true;
    }

    // mix the virtual-root vector across rate categories
    let mut combined = vec![S::zero(); n_states];
    for category in 0..cache.n_categories() {
      let vector = virtual_root_vector::<S>(site, cache, ambiguity, constraints, category, node, &on_path, &path)?;
      let weight = S::from_f64(cache.weight(category));
      for (acc, value) in combined.iter_mut().zip(vector) {
        *acc = *acc + value * weight;
      }
    }

    let total: S = combined.iter().copied().sum();
    if total.is_zero() {
      return make_error!(
        "Posterior at node '{}' is undefined: the site has zero likelihood under every state",
        tree.name(node)
      );
    }
    let posterior = combined.into_iter().map(|value| (value / total).to_f64()).collect();
    posteriors.insert(tree.name(node).to_owned(), posterior);
  }

  Ok(posteriors)
}

fn virtual_root_vector<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  constraints: &StateConstraints,
  category: usize,
  node: NodeId,
  on_path: &[bool],
  path: &[usize],
) -> Result<Vec<S>, Report> {
  let tree = cache.tree();
  let mut partials = seed_partials::<S>(site, cache, ambiguity, constraints)?;

  // normal branches: ordinary sum-product, postorder
  for (branch_id, branch) in tree.branches().iter().enumerate() {
    if on_path[branch_id] {
      continue;
    }
    fold_branch(&mut partials, branch, cache.p(category, branch_id), false);
  }

  // the true root contributes its own frequency vector (not the virtual
  // root's)
  let freqs = cache.freqs(category);
  for (state, &freq) in freqs.iter().enumerate() {
    partials[tree.root()].mul_assign(state, S::from_f64(freq));
  }

  // path branches, true root towards the virtual root, time-reversed
  for &branch_id in path.iter().rev() {
    fold_branch(&mut partials, &tree.branches()[branch_id], cache.p(category, branch_id), true);
  }

  Ok(partials[node].values().to_vec())
}
