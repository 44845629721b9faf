use crate::alignment::alignment::Alignment;
use crate::alignment::ambiguity::Ambiguity;
use crate::alignment::site::Site;
use crate::config::{EngineConfig, ScalarKind};
use crate::likelihood::constraints::StateConstraints;
use crate::likelihood::node_lik::NodeLikelihood;
use crate::likelihood::prob_cache::ProbabilityCache;
use crate::likelihood::results::{AlignmentLikelihood, RateLikelihood, SiteLikelihood};
use crate::model::model::Model;
use crate::model::parameters::Parameters;
use crate::scalar::scalar::Scalar;
use crate::scalar::scaled::ScaledFloat;
use crate::tree::tree::{Branch, Tree};
use crate::{make_error, make_internal_report};
use eyre::{Report, WrapErr};
use indexmap::{indexmap, IndexMap, IndexSet};
use itertools::Itertools;
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use std::sync::Arc;

/// Model and tree used for the sites of one class label
#[derive(Clone, Debug)]
pub struct ClassContext {
  pub model: Model,
  pub tree: Tree,
}

fn class_name(label: &Option<String>) -> &str {
  label.as_deref().unwrap_or("(default)")
}

/// Whole-alignment likelihood engine: Felsenstein's pruning recursion per
/// unique site and rate category, parallelized across sites on a bounded
/// worker pool, combined into a multiplicity-weighted log-likelihood sum
/// with an optional unobserved-data correction (Felsenstein 1992).
pub struct TreeLikelihood {
  config: EngineConfig,
  pool: Arc<rayon::ThreadPool>,
  classes: IndexMap<Option<String>, ClassContext>,
  alignment: Alignment,
  unobserved: Option<Alignment>,
  ambiguity: Ambiguity,
}

impl TreeLikelihood {
  /// Single-class engine: one model, one tree, every site unlabeled
  pub fn new(
    model: Model,
    tree: Tree,
    alignment: Alignment,
    ambiguity: Ambiguity,
    config: EngineConfig,
  ) -> Result<Self, Report> {
    Self::with_classes(indexmap! { None => ClassContext { model, tree } }, alignment, ambiguity, config)
  }

  /// Multi-class engine: each site's class label selects its model/tree.
  /// Structural mismatches (taxa that are not leaves, leaves without
  /// observations, labels without a context) fail here, not during
  /// computation.
  pub fn with_classes(
    classes: IndexMap<Option<String>, ClassContext>,
    alignment: Alignment,
    ambiguity: Ambiguity,
    config: EngineConfig,
  ) -> Result<Self, Report> {
    if classes.is_empty() {
      return make_error!("At least one site class (model and tree) is required");
    }
    validate_alignment(&alignment, &classes)?;

    let pool = Arc::new(config.build_pool()?);

    Ok(Self {
      config,
      pool,
      classes,
      alignment,
      unobserved: None,
      ambiguity,
    })
  }

  /// Attach an alignment of unobservable site patterns; their summed
  /// likelihood corrects the total via L - n·ln(1 - U), per site class
  pub fn with_unobserved(mut self, unobserved: Alignment) -> Result<Self, Report> {
    validate_alignment(&unobserved, &self.classes)?;
    self.unobserved = Some(unobserved);
    Ok(self)
  }

  pub const fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Total log-likelihood of the alignment for one parameter assignment,
  /// with per-site and per-category breakdowns
  pub fn calculate(&self, params: &Parameters) -> Result<AlignmentLikelihood, Report> {
    match self.config.scalar {
      ScalarKind::Plain => self.calculate_generic::<f64>(params),
      ScalarKind::Scaled => self.calculate_generic::<ScaledFloat>(params),
    }
  }

  fn calculate_generic<S: Scalar>(&self, params: &Parameters) -> Result<AlignmentLikelihood, Report> {
    let caches: IndexMap<Option<String>, ProbabilityCache> = self
      .classes
      .iter()
      .map(|(label, ctx)| {
        let cache = ProbabilityCache::build(&ctx.model, &ctx.tree, params, &self.config)
          .wrap_err_with(|| format!("When preparing probabilities for site class {}", class_name(label)))?;
        Ok((label.clone(), cache))
      })
      .collect::<Result<_, Report>>()?;

    let unique = self.alignment.unique_sites();
    let no_constraints = StateConstraints::unconstrained();

    // Each unique site is an independent, stateless task over the shared
    // read-only caches; the pool join is the only blocking point.
    let computed = self.pool.install(|| {
      unique
        .iter()
        .collect_vec()
        .into_par_iter()
        .map(|((label, site), _)| {
          let cache = caches
            .get(label)
            .ok_or_else(|| make_internal_report!("No probability cache for site class {}", class_name(label)))?;
          site_likelihood::<S>(site, cache, &self.ambiguity, &no_constraints, self.config.retain_partials)
        })
        .collect::<Result<Vec<_>, Report>>()
    })?;

    // Combination is keyed by site identity, never by task completion
    // order.
    let mut site_results: IndexMap<(Option<String>, Site), SiteLikelihood> = IndexMap::new();
    let mut class_ln: IndexMap<Option<String>, f64> = self.classes.keys().map(|l| (l.clone(), 0.0)).collect();
    let mut class_columns: IndexMap<Option<String>, usize> = self.classes.keys().map(|l| (l.clone(), 0)).collect();

    for (((label, site), count), (_, site_lik)) in unique.into_iter().zip(computed) {
      *class_ln.get_mut(&label).expect("class validated at construction") += (count as f64) * site_lik.ln_likelihood;
      *class_columns.get_mut(&label).expect("class validated at construction") += count;
      site_results.insert((label, site), site_lik);
    }

    if let Some(unobserved) = &self.unobserved {
      self.apply_unobserved_correction::<S>(unobserved, &caches, &mut class_ln, &class_columns)?;
    }

    let ln_likelihood: f64 = class_ln.values().sum();
    debug!("Alignment log-likelihood: {ln_likelihood}");

    if ln_likelihood.is_nan() || ln_likelihood > 0.0 {
      return make_error!(
        "Alignment log-likelihood evaluated to {ln_likelihood}; a positive or NaN log-likelihood indicates a modeling or numeric fault"
      );
    }

    Ok(AlignmentLikelihood::new(ln_likelihood, class_ln, site_results))
  }

  /// Felsenstein 1992 correction for alignments that cannot contain
  /// certain site patterns: L − n_columns·ln(1 − U) per class, where U is
  /// the summed likelihood of the unobservable patterns
  fn apply_unobserved_correction<S: Scalar>(
    &self,
    unobserved: &Alignment,
    caches: &IndexMap<Option<String>, ProbabilityCache>,
    class_ln: &mut IndexMap<Option<String>, f64>,
    class_columns: &IndexMap<Option<String>, usize>,
  ) -> Result<(), Report> {
    let unique = unobserved.unique_sites();
    let no_constraints = StateConstraints::unconstrained();

    // deduplicated, but no multiplicity weighting for unobserved patterns
    let unique_entries = unique.keys().collect_vec();
    let totals = self.pool.install(|| {
      unique_entries
        .par_iter()
        .map(|(label, site)| {
          let cache = caches
            .get(label)
            .ok_or_else(|| make_internal_report!("No probability cache for site class {}", class_name(label)))?;
          let (total, _) = site_likelihood::<S>(site, cache, &self.ambiguity, &no_constraints, false)?;
          Ok((label.clone(), total))
        })
        .collect::<Result<Vec<(Option<String>, S)>, Report>>()
    })?;

    let mut class_sums: IndexMap<Option<String>, S> = IndexMap::new();
    for (label, total) in totals {
      let sum = class_sums.entry(label).or_insert_with(S::zero);
      *sum = *sum + total;
    }

    for (label, sum) in class_sums {
      if sum.to_f64() >= 1.0 {
        return make_error!(
          "Unobservable site patterns of class {} have total likelihood {} >= 1; the correction ln(1 - U) is undefined",
          class_name(&label),
          sum.to_f64()
        );
      }
      let columns = class_columns.get(&label).copied().unwrap_or(0);
      let correction = sum.ln_one_minus();
      debug!(
        "Unobserved-data correction for class {}: {columns} columns, ln(1-U) = {correction}",
        class_name(&label)
      );
      *class_ln.get_mut(&label).expect("class validated at construction") -= (columns as f64) * correction;
    }

    Ok(())
  }
}

/// Taxon/leaf agreement for engines that use a single model and tree
/// (the ancestral reconstructors)
pub(crate) fn validate_single_class(alignment: &Alignment, tree: &Tree) -> Result<(), Report> {
  let leaf_names: IndexSet<&str> = tree.leaf_names().collect();
  for taxon in alignment.taxa() {
    if !leaf_names.contains(taxon.as_str()) {
      return make_error!("Taxon '{taxon}' of the alignment is not a leaf of the tree");
    }
  }
  for leaf in leaf_names {
    if !alignment.taxa().iter().any(|taxon| taxon == leaf) {
      return make_error!("Leaf '{leaf}' of the tree has no observations in the alignment");
    }
  }
  Ok(())
}

fn validate_alignment(alignment: &Alignment, classes: &IndexMap<Option<String>, ClassContext>) -> Result<(), Report> {
  for (label, ctx) in classes {
    let leaf_names: IndexSet<&str> = ctx.tree.leaf_names().collect();
    for taxon in alignment.taxa() {
      if !leaf_names.contains(taxon.as_str()) {
        return make_error!(
          "Taxon '{taxon}' of the alignment is not a leaf of the tree for site class {}",
          class_name(label)
        );
      }
    }
    for leaf in leaf_names {
      if !alignment.taxa().iter().any(|taxon| taxon == leaf) {
        return make_error!(
          "Leaf '{leaf}' of the tree for site class {} has no observations in the alignment",
          class_name(label)
        );
      }
    }
  }

  for (i, site) in alignment.sites().iter().enumerate() {
    let label = site.label().map(ToString::to_string);
    if !classes.contains_key(&label) {
      return make_error!(
        "Site {i} carries class label {} with no matching model/tree",
        class_name(&label)
      );
    }
  }

  Ok(())
}

/// Likelihood of one site: the pruning recursion per rate category,
/// combined by the root policy and the category mixture weights. Returns
/// both the mixture likelihood as a scalar (needed by callers that sum
/// site likelihoods) and the per-category breakdown.
pub(crate) fn site_likelihood<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  constraints: &StateConstraints,
  retain_partials: bool,
) -> Result<(S, SiteLikelihood), Report> {
  let tree = cache.tree();

  let mut category_liks: Vec<S> = Vec::with_capacity(cache.n_categories());
  let mut retained: Vec<Option<IndexMap<String, Vec<f64>>>> = Vec::with_capacity(cache.n_categories());

  for category in 0..cache.n_categories() {
    let partials = category_partials::<S>(site, cache, ambiguity, constraints, category)?;
    let root_lik = cache
      .root_policy()
      .combine(partials[tree.root()].values(), cache.freqs(category));

    retained.push(retain_partials.then(|| {
      (0..tree.num_nodes())
        .map(|id| {
          let logs = partials[id].values().iter().map(|v| v.ln()).collect_vec();
          (tree.name(id).to_owned(), logs)
        })
        .collect()
    }));
    category_liks.push(root_lik);
  }

  let total: S = category_liks
    .iter()
    .enumerate()
    .map(|(c, &lik)| lik * S::from_f64(cache.weight(c)))
    .sum();

  let categories = category_liks
    .iter()
    .zip(retained)
    .enumerate()
    .map(|(c, (&lik, partials))| {
      let weighted = lik * S::from_f64(cache.weight(c));
      let posterior = if total.is_zero() { 0.0 } else { (weighted / total).to_f64() };
      RateLikelihood {
        ln_likelihood: lik.ln(),
        posterior,
        partials,
      }
    })
    .collect_vec();

  // first-found maximum keeps tie behavior deterministic
  let mut best_category = 0;
  for (c, category) in categories.iter().enumerate().skip(1) {
    if category.posterior > categories[best_category].posterior {
      best_category = c;
    }
  }

  let site_lik = SiteLikelihood {
    ln_likelihood: total.ln(),
    categories,
    best_category,
  };
  Ok((total, site_lik))
}

/// The pruning recursion for one site and one rate category: seed every
/// node's per-state vector, then walk the branch list (postorder) and fold
/// each child's message into its parent.
pub(crate) fn category_partials<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  constraints: &StateConstraints,
  category: usize,
) -> Result<Vec<NodeLikelihood<S>>, Report> {
  let tree = cache.tree();
  let mut partials = seed_partials::<S>(site, cache, ambiguity, constraints)?;

  for (branch_id, branch) in tree.branches().iter().enumerate() {
    fold_branch(&mut partials, branch, cache.p(category, branch_id), false);
  }

  Ok(partials)
}

/// Initial per-node vectors for one site: leaves from their observed
/// (possibly ambiguous) tokens, internal nodes all-ones restricted by any
/// constraints.
pub(crate) fn seed_partials<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
  constraints: &StateConstraints,
) -> Result<Vec<NodeLikelihood<S>>, Report> {
  let tree = cache.tree();
  let n_states = cache.n_states();

  (0..tree.num_nodes())
    .map(|id| {
      let name = tree.name(id);
      if tree.is_leaf(id) {
        NodeLikelihood::from_observation(name, site.state(name)?, ambiguity, cache.state_index_map())
      } else {
        seed_internal(name, n_states, constraints, cache)
      }
    })
    .collect()
}

/// Fold one branch's transition probabilities into the partials. In the
/// normal direction the child's message updates the parent: for each end
/// state at the parent, marginalize the start state at the child through
/// P[end, start]. With `reversed` the parent's message updates the child
/// with the index roles swapped (transition matrices are not symmetric for
/// non-reversible generators), which is how the path to the true root is
/// traversed when an internal node acts as a virtual root.
pub(crate) fn fold_branch<S: Scalar>(partials: &mut [NodeLikelihood<S>], branch: &Branch, p: &Array2<f64>, reversed: bool) {
  let (src, dst) = if reversed {
    (branch.parent(), branch.child())
  } else {
    (branch.child(), branch.parent())
  };
  let n_states = partials[src].n_states();

  let msg: Vec<S> = {
    let source = &partials[src];
    (0..n_states)
      .map(|end| {
        (0..n_states)
          .map(|start| {
            let prob = if reversed { p[[start, end]] } else { p[[end, start]] };
            source.get(start) * S::from_f64(prob)
          })
          .sum()
      })
      .collect_vec()
  };

  let target = &mut partials[dst];
  for (end, factor) in msg.into_iter().enumerate() {
    target.mul_assign(end, factor);
  }
}

fn seed_internal<S: Scalar>(
  name: &str,
  n_states: usize,
  constraints: &StateConstraints,
  cache: &ProbabilityCache,
) -> Result<NodeLikelihood<S>, Report> {
  match constraints.allowed(name) {
    None => Ok(NodeLikelihood::ones(n_states)),
    Some(states) => {
      let indices = states.iter().filter_map(|s| cache.state_index(s)).collect_vec();
      if indices.is_empty() {
        make_error!("Constraint on node '{name}' allows no state of the model")
      } else {
        Ok(NodeLikelihood::constrained(n_states, indices))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::likelihood::root::RootPolicy;
  use crate::model::expr::RateExpr;
  use crate::model::rate_category::{FreqStrategy, RateCategory};
  use approx::assert_ulps_eq;
  use lazy_static::lazy_static;
  use maplit::btreemap;
  use rstest::rstest;

  lazy_static! {
    static ref JC2: Model = Model::jukes_cantor(&["0", "1"]).unwrap();
    static ref JC_NUC: Model = Model::jukes_cantor(&["A", "C", "G", "T"]).unwrap();
  }

  fn p_same(t: f64) -> f64 {
    (1.0 + (-2.0 * t).exp()) / 2.0
  }

  fn p_diff(t: f64) -> f64 {
    (1.0 - (-2.0 * t).exp()) / 2.0
  }

  fn two_leaf_engine(config: EngineConfig) -> TreeLikelihood {
    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![Site::new(btreemap! {"x" => "0", "y" => "0"})]).unwrap();
    TreeLikelihood::new(JC2.clone(), tree, alignment, Ambiguity::new(), config).unwrap()
  }

  #[rstest]
  fn matches_closed_form_for_two_leaves() {
    let engine = two_leaf_engine(EngineConfig::default());
    let result = engine.calculate(&Parameters::new()).unwrap();

    // root sums over its own state: both leaves observe state 0
    let expected = 0.5 * (p_same(0.3) * p_same(0.5) + p_diff(0.3) * p_diff(0.5));
    assert_ulps_eq!(result.ln_likelihood(), expected.ln(), epsilon = 1e-9);
  }

  #[rstest]
  fn plain_and_scaled_scalars_agree() {
    for scalar in [ScalarKind::Plain, ScalarKind::Scaled] {
      let engine = two_leaf_engine(EngineConfig {
        scalar,
        ..EngineConfig::default()
      });
      let result = engine.calculate(&Parameters::new()).unwrap();
      let expected = 0.5 * (p_same(0.3) * p_same(0.5) + p_diff(0.3) * p_diff(0.5));
      assert_ulps_eq!(result.ln_likelihood(), expected.ln(), epsilon = 1e-9);
    }
  }

  #[rstest]
  fn partial_retention_follows_the_config() {
    let site = Site::new(btreemap! {"x" => "0", "y" => "0"});

    let result = two_leaf_engine(EngineConfig::default()).calculate(&Parameters::new()).unwrap();
    let partials = result.site(&site).unwrap().categories[0].partials.as_ref().unwrap();
    assert_eq!(partials.len(), 3); // x, y, root
    assert_eq!(partials["root"].len(), 2);

    let result = two_leaf_engine(EngineConfig {
      retain_partials: false,
      ..EngineConfig::default()
    })
    .calculate(&Parameters::new())
    .unwrap();
    assert!(result.site(&site).unwrap().categories[0].partials.is_none());
  }

  #[rstest]
  fn fitzjohn_root_conditions_on_data() {
    let model = JC2.clone().with_root_policy(RootPolicy::FitzJohn);
    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![Site::new(btreemap! {"x" => "0", "y" => "0"})]).unwrap();
    let engine = TreeLikelihood::new(model, tree, alignment, Ambiguity::new(), EngineConfig::default()).unwrap();
    let result = engine.calculate(&Parameters::new()).unwrap();

    let l0 = p_same(0.3) * p_same(0.5);
    let l1 = p_diff(0.3) * p_diff(0.5);
    let expected = (l0 * l0 + l1 * l1) / (l0 + l1);
    assert_ulps_eq!(result.ln_likelihood(), expected.ln(), epsilon = 1e-9);
  }

  #[rstest]
  fn deduplication_preserves_the_total() {
    let model = JC_NUC.clone();
    let tree = Tree::new([
      ("ab", "a", Some(0.1)),
      ("ab", "b", Some(0.2)),
      ("root", "ab", Some(0.15)),
      ("root", "c", Some(0.3)),
    ])
    .unwrap();

    let columns = [("A", "A", "C"), ("A", "A", "C"), ("G", "G", "G"), ("A", "A", "C")];
    let sites = columns
      .iter()
      .map(|(a, b, c)| Site::new(btreemap! {"a" => *a, "b" => *b, "c" => *c}))
      .collect_vec();

    let engine = TreeLikelihood::new(
      model.clone(),
      tree.clone(),
      Alignment::new(sites.clone()).unwrap(),
      Ambiguity::nucleotide(),
      EngineConfig::default(),
    )
    .unwrap();
    let total = engine.calculate(&Parameters::new()).unwrap();
    assert_eq!(total.n_unique_sites(), 2);

    // evaluating every column individually and summing must agree
    let mut per_column_sum = 0.0;
    for site in sites {
      let engine = TreeLikelihood::new(
        model.clone(),
        tree.clone(),
        Alignment::new(vec![site]).unwrap(),
        Ambiguity::nucleotide(),
        EngineConfig::default(),
      )
      .unwrap();
      per_column_sum += engine.calculate(&Parameters::new()).unwrap().ln_likelihood();
    }
    assert_ulps_eq!(total.ln_likelihood(), per_column_sum, epsilon = 1e-9);
  }

  #[rstest]
  fn rerooting_preserves_the_likelihood_for_reversible_models() {
    let model = JC_NUC.clone();
    let alignment = Alignment::new(vec![
      Site::new(btreemap! {"a" => "A", "b" => "A", "c" => "C", "d" => "G"}),
      Site::new(btreemap! {"a" => "T", "b" => "C", "c" => "C", "d" => "C"}),
    ])
    .unwrap();

    // same unrooted topology; the u-v path length 0.15 is preserved
    let rooted_on_edge = Tree::new([
      ("u", "a", Some(0.1)),
      ("u", "b", Some(0.2)),
      ("root", "u", Some(0.07)),
      ("v", "c", Some(0.3)),
      ("v", "d", Some(0.4)),
      ("root", "v", Some(0.08)),
    ])
    .unwrap();
    let rooted_at_u = Tree::new([
      ("u", "a", Some(0.1)),
      ("u", "b", Some(0.2)),
      ("v", "c", Some(0.3)),
      ("v", "d", Some(0.4)),
      ("u", "v", Some(0.15)),
    ])
    .unwrap();

    let ln_edge = TreeLikelihood::new(
      model.clone(),
      rooted_on_edge,
      alignment.clone(),
      Ambiguity::nucleotide(),
      EngineConfig::default(),
    )
    .unwrap()
    .calculate(&Parameters::new())
    .unwrap()
    .ln_likelihood();

    let ln_u = TreeLikelihood::new(model, rooted_at_u, alignment, Ambiguity::nucleotide(), EngineConfig::default())
      .unwrap()
      .calculate(&Parameters::new())
      .unwrap()
      .ln_likelihood();

    assert_ulps_eq!(ln_edge, ln_u, epsilon = 1e-9);
  }

  #[rstest]
  fn mixture_total_combines_categories_by_weight() {
    let slow = RateCategory::new(
      ["0", "1"],
      vec![
        vec![RateExpr::Const(0.0), RateExpr::Const(0.5)],
        vec![RateExpr::Const(0.5), RateExpr::Const(0.0)],
      ],
      FreqStrategy::Stationary,
    )
    .unwrap();
    let fast = RateCategory::new(
      ["0", "1"],
      vec![
        vec![RateExpr::Const(0.0), RateExpr::Const(2.0)],
        vec![RateExpr::Const(2.0), RateExpr::Const(0.0)],
      ],
      FreqStrategy::Stationary,
    )
    .unwrap();

    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![Site::new(btreemap! {"x" => "0", "y" => "1"})]).unwrap();

    let mixture = Model::new(
      vec![slow.clone(), fast.clone()],
      vec![RateExpr::Const(1.0), RateExpr::Const(3.0)],
    )
    .unwrap();
    let mix_result = TreeLikelihood::new(
      mixture,
      tree.clone(),
      alignment.clone(),
      Ambiguity::new(),
      EngineConfig::default(),
    )
    .unwrap()
    .calculate(&Parameters::new())
    .unwrap();

    let single_ln = |category: RateCategory| -> f64 {
      TreeLikelihood::new(
        Model::single(category).unwrap(),
        tree.clone(),
        alignment.clone(),
        Ambiguity::new(),
        EngineConfig::default(),
      )
      .unwrap()
      .calculate(&Parameters::new())
      .unwrap()
      .ln_likelihood()
    };

    let expected = 0.25 * single_ln(slow).exp() + 0.75 * single_ln(fast).exp();
    assert_ulps_eq!(mix_result.ln_likelihood(), expected.ln(), epsilon = 1e-9);

    // per-category posteriors sum to 1 and flag the more likely category
    let site = Site::new(btreemap! {"x" => "0", "y" => "1"});
    let breakdown = mix_result.site(&site).unwrap();
    let posterior_sum: f64 = breakdown.categories.iter().map(|c| c.posterior).sum();
    assert_ulps_eq!(posterior_sum, 1.0, epsilon = 1e-9);
    assert_eq!(breakdown.best_category, 1);
  }

  #[rstest]
  fn unobserved_correction_raises_the_likelihood() {
    let model = JC2.clone();
    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![
      Site::new(btreemap! {"x" => "0", "y" => "1"}),
      Site::new(btreemap! {"x" => "1", "y" => "0"}),
    ])
    .unwrap();
    // constant patterns are unobservable in this hypothetical ascertainment
    let unobserved = Alignment::new(vec![
      Site::new(btreemap! {"x" => "0", "y" => "0"}),
      Site::new(btreemap! {"x" => "1", "y" => "1"}),
    ])
    .unwrap();

    let plain = TreeLikelihood::new(
      model.clone(),
      tree.clone(),
      alignment.clone(),
      Ambiguity::new(),
      EngineConfig::default(),
    )
    .unwrap();
    let plain_result = plain.calculate(&Parameters::new()).unwrap();

    let unobs_engine = TreeLikelihood::new(
      model.clone(),
      tree.clone(),
      unobserved.clone(),
      Ambiguity::new(),
      EngineConfig::default(),
    )
    .unwrap();
    let u: f64 = unobs_engine
      .calculate(&Parameters::new())
      .unwrap()
      .sites()
      .map(|(_, site)| site.ln_likelihood.exp())
      .sum();

    let corrected = TreeLikelihood::new(model, tree, alignment, Ambiguity::new(), EngineConfig::default())
      .unwrap()
      .with_unobserved(unobserved)
      .unwrap()
      .calculate(&Parameters::new())
      .unwrap();

    // L_corr = L - n·ln(1-U); the correction always raises the total
    let expected = plain_result.ln_likelihood() - 2.0 * (-u).ln_1p();
    assert_ulps_eq!(corrected.ln_likelihood(), expected, epsilon = 1e-9);
    assert!(corrected.ln_likelihood() > plain_result.ln_likelihood());
  }

  #[rstest]
  fn unknown_class_label_fails_at_construction() {
    let model = JC2.clone();
    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![Site::with_label("fast", btreemap! {"x" => "0", "y" => "1"})]).unwrap();
    let result = TreeLikelihood::new(model, tree, alignment, Ambiguity::new(), EngineConfig::default());
    assert!(result.is_err());
  }

  #[rstest]
  fn unknown_taxon_fails_at_construction() {
    let model = JC2.clone();
    let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
    let alignment = Alignment::new(vec![Site::new(btreemap! {"x" => "0", "z" => "1"})]).unwrap();
    let result = TreeLikelihood::new(model, tree, alignment, Ambiguity::new(), EngineConfig::default());
    assert!(result.is_err());
  }

  #[rstest]
  fn observation_outside_the_model_fails() {
    let engine = {
      let model = JC2.clone();
      let tree = Tree::new([("root", "x", Some(0.3)), ("root", "y", Some(0.5))]).unwrap();
      let alignment = Alignment::new(vec![Site::new(btreemap! {"x" => "0", "y" => "9"})]).unwrap();
      TreeLikelihood::new(model, tree, alignment, Ambiguity::new(), EngineConfig::default()).unwrap()
    };
    assert!(engine.calculate(&Parameters::new()).is_err());
  }
}
