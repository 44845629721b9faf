use crate::alignment::alignment::Alignment;
use crate::alignment::ambiguity::Ambiguity;
use crate::alignment::site::Site;
use crate::ancestral::assignment::Assignment;
use crate::ancestral::joint_dp::dp_site_assignment;
use crate::ancestral::{assignments_to_alignment, unique_site_keys};
use crate::config::{EngineConfig, ScalarKind};
use crate::likelihood::constraints::StateConstraints;
use crate::likelihood::prob_cache::ProbabilityCache;
use crate::likelihood::pruning::{category_partials, site_likelihood, validate_single_class};
use crate::model::model::Model;
use crate::model::parameters::Parameters;
use crate::scalar::scalar::Scalar;
use crate::scalar::scaled::ScaledFloat;
use crate::tree::tree::Tree;
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use log::trace;
use rayon::prelude::*;
use std::sync::Arc;

/// Joint maximum-likelihood ancestral reconstruction for mixture models:
/// depth-first branch-and-bound over all internal-node assignments, seeded
/// by the exact single-category solution of the dominant category.
///
/// The bound at a partial assignment is the sum-product likelihood with
/// the still-unassigned nodes marginalized. Fixing a node's state removes
/// terms from that sum, so the bound never increases as the search
/// descends, which makes it admissible: the search returns the assignment
/// with the strictly maximal full-mixture likelihood.
pub struct JointBb {
  model: Model,
  tree: Tree,
  alignment: Alignment,
  ambiguity: Ambiguity,
  config: EngineConfig,
  pool: Arc<rayon::ThreadPool>,
}

impl JointBb {
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
    })
  }

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
        .map(|(_, site)| bb_site_assignment::<S>(site, &cache, &self.ambiguity))
        .collect::<Result<Vec<_>, Report>>()
    })?;

    let per_site: IndexMap<(Option<String>, Site), Assignment> = keys.into_iter().zip(assignments).collect();
    assignments_to_alignment(&self.alignment, &cache, &per_site)
  }
}

struct SiteSearch<'a, S: Scalar> {
  site: &'a Site,
  cache: &'a ProbabilityCache,
  ambiguity: &'a Ambiguity,
  internals: Vec<String>,
  seed: Assignment,
  _marker: std::marker::PhantomData<S>,
}

fn bb_site_assignment<S: Scalar>(
  site: &Site,
  cache: &ProbabilityCache,
  ambiguity: &Ambiguity,
) -> Result<Assignment, Report> {
  let tree = cache.tree();

  // dominant category: the single category with the highest sum-product
  // site likelihood (first-found maximum on ties)
  let no_constraints = StateConstraints::unconstrained();
  let mut dominant = 0;
  let mut dominant_lik = S::zero();
  for category in 0..cache.n_categories() {
    let partials = category_partials::<S>(site, cache, ambiguity, &no_constraints, category)?;
    let lik = cache
      .root_policy()
      .combine(partials[tree.root()].values(), cache.freqs(category));
    if category == 0 || lik.gt(dominant_lik) {
      dominant = category;
      dominant_lik = lik;
    }
  }

  let seed = dp_site_assignment::<S>(site, cache, ambiguity, dominant)?;

  let search = SiteSearch::<S> {
    site,
    cache,
    ambiguity,
    internals: tree.internals().iter().map(|&id| tree.name(id).to_owned()).collect_vec(),
    seed,
    _marker: std::marker::PhantomData,
  };

  // the seed evaluated under the full mixture is the initial incumbent,
  // so the result can never fall below it
  let seed_lik = search.mixture_likelihood(&search.seed)?;
  let mut best = (seed_lik, search.seed.clone());
  let mut working = Assignment::new();
  search.descend(0, &mut working, &mut best)?;

  Ok(best.1)
}

impl<'a, S: Scalar> SiteSearch<'a, S> {
  /// Full-mixture sum-product likelihood of the site with assigned nodes
  /// pinned and unassigned nodes marginalized
  fn mixture_likelihood(&self, assignment: &Assignment) -> Result<S, Report> {
    let constraints = assignment.to_constraints(self.cache.states());
    let (total, _) = site_likelihood::<S>(self.site, self.cache, self.ambiguity, &constraints, false)?;
    Ok(total)
  }

  fn descend(&self, depth: usize, working: &mut Assignment, best: &mut (S, Assignment)) -> Result<(), Report> {
    if depth == self.internals.len() {
      let lik = self.mixture_likelihood(working)?;
      if lik.gt(best.0) {
        *best = (lik, working.clone());
      }
      return Ok(());
    }

    // marginalizing fewer nodes cannot increase the likelihood, so a
    // partial assignment whose bound does not beat the incumbent cannot
    // contain a better completion
    let bound = self.mixture_likelihood(working)?;
    if !bound.gt(best.0) {
      trace!("Pruned ancestral search at depth {depth}");
      return Ok(());
    }

    let node = &self.internals[depth];
    let seed_state = self
      .seed
      .get(node)
      .expect("seed assignment covers every internal node");

    // seed state first: a strong incumbent early makes the bound bite
    let others = (0..self.cache.n_states()).filter(|&s| s != seed_state);
    for state in std::iter::once(seed_state).chain(others) {
      working.assign(node.clone(), state);
      self.descend(depth + 1, working, best)?;
    }
    working.unassign(node);

    Ok(())
  }
}
