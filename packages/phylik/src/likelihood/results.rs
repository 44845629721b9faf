use crate::alignment::site::Site;
use indexmap::IndexMap;
use serde::Serialize;

/// Likelihood of one site under one rate category
#[derive(Clone, Debug, Serialize)]
pub struct RateLikelihood {
  /// Natural log of the category's site likelihood
  pub ln_likelihood: f64,

  /// Posterior probability that the site belongs to this category (its
  /// weighted share of the site total)
  pub posterior: f64,

  /// Per-node partial likelihood vectors (natural logs, one entry per
  /// state), retained unless disabled in the engine configuration
  pub partials: Option<IndexMap<String, Vec<f64>>>,
}

/// Immutable per-site likelihood result, broken down per rate category
#[derive(Clone, Debug, Serialize)]
pub struct SiteLikelihood {
  /// Natural log of the mixture site likelihood Σ_c weight_c · L_c
  pub ln_likelihood: f64,

  pub categories: Vec<RateLikelihood>,

  /// Most probable rate category for this site
  pub best_category: usize,
}

/// Whole-alignment likelihood result
#[derive(Clone, Debug, Serialize)]
pub struct AlignmentLikelihood {
  ln_likelihood: f64,
  class_ln_likelihoods: IndexMap<Option<String>, f64>,
  sites: IndexMap<(Option<String>, Site), SiteLikelihood>,
}

impl AlignmentLikelihood {
  pub(crate) fn new(
    ln_likelihood: f64,
    class_ln_likelihoods: IndexMap<Option<String>, f64>,
    sites: IndexMap<(Option<String>, Site), SiteLikelihood>,
  ) -> Self {
    Self {
      ln_likelihood,
      class_ln_likelihoods,
      sites,
    }
  }

  /// Total log-likelihood: Σ multiplicity · ln L_site, with the
  /// unobserved-data correction applied when configured
  pub const fn ln_likelihood(&self) -> f64 {
    self.ln_likelihood
  }

  /// Corrected log-likelihood contribution of one site class
  pub fn class_ln_likelihood(&self, label: Option<&str>) -> Option<f64> {
    self.class_ln_likelihoods.get(&label.map(ToString::to_string)).copied()
  }

  /// Result for one (deduplicated) site
  pub fn site(&self, site: &Site) -> Option<&SiteLikelihood> {
    let key = (site.label().map(ToString::to_string), site.clone());
    self.sites.get(&key)
  }

  /// Unique-site results in first-appearance order
  pub fn sites(&self) -> impl Iterator<Item = (&(Option<String>, Site), &SiteLikelihood)> {
    self.sites.iter()
  }

  pub fn n_unique_sites(&self) -> usize {
    self.sites.len()
  }
}
