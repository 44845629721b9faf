use crate::likelihood::root::RootPolicy;
use crate::make_error;
use crate::model::expr::RateExpr;
use crate::model::parameters::Parameters;
use crate::model::rate_category::{FreqStrategy, RateCategory};
use eyre::{Report, WrapErr};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::HashMap;

/// Weighted mixture of rate categories over one shared state set.
///
/// All categories must list identical states in identical order, so the
/// state→index map is a single structural fact of the model; this is
/// enforced at construction. Weights are expressions, normalized to sum 1
/// once evaluated. The optional rate normalization rescales every
/// generator so the weighted average substitution rate is 1, keeping rate
/// and branch length from confounding each other.
#[derive(Clone, Debug)]
pub struct Model {
  states: Vec<String>,
  state_index: IndexMap<String, usize>,
  categories: Vec<RateCategory>,
  weights: Vec<RateExpr>,
  normalize_rate: bool,
  root_policy: RootPolicy,
}

impl Model {
  pub fn new(categories: Vec<RateCategory>, weights: Vec<RateExpr>) -> Result<Self, Report> {
    let Some(first) = categories.first() else {
      return make_error!("Model must contain at least one rate category");
    };
    if weights.len() != categories.len() {
      return make_error!(
        "Model must have one weight per rate category, but found {} weights for {} categories",
        weights.len(),
        categories.len()
      );
    }

    let states = first.states().to_vec();
    for (i, category) in categories.iter().enumerate() {
      if category.states() != states.as_slice() {
        return make_error!(
          "All rate categories must share one state set in one order, but category {i} lists [{}] while the first lists [{}]",
          category.states().iter().join(", "),
          states.iter().join(", ")
        );
      }
    }

    let state_index = states.iter().enumerate().map(|(i, s)| (s.clone(), i)).collect();

    Ok(Self {
      states,
      state_index,
      categories,
      weights,
      normalize_rate: false,
      root_policy: RootPolicy::Standard,
    })
  }

  /// Single-category model with unit weight
  pub fn single(category: RateCategory) -> Result<Self, Report> {
    Self::new(vec![category], vec![RateExpr::Const(1.0)])
  }

  /// Jukes-Cantor-style model over an arbitrary state set: equal exchange
  /// rates, stationary (uniform) frequencies, average rate normalized to 1
  pub fn jukes_cantor(states: &[&str]) -> Result<Self, Report> {
    let n = states.len();
    let rates = vec![vec![RateExpr::Const(1.0); n]; n];
    let category = RateCategory::new(states.iter().copied(), rates, FreqStrategy::Stationary)?;
    Ok(Self::single(category)?.with_rate_normalization(true))
  }

  #[must_use]
  pub fn with_root_policy(mut self, root_policy: RootPolicy) -> Self {
    self.root_policy = root_policy;
    self
  }

  #[must_use]
  pub fn with_rate_normalization(mut self, normalize_rate: bool) -> Self {
    self.normalize_rate = normalize_rate;
    self
  }

  pub fn n_states(&self) -> usize {
    self.states.len()
  }

  pub fn states(&self) -> &[String] {
    &self.states
  }

  /// Index of a state token; identical across all categories
  pub fn state_index(&self, token: &str) -> Option<usize> {
    self.state_index.get(token).copied()
  }

  pub fn state_token(&self, index: usize) -> &str {
    &self.states[index]
  }

  pub fn categories(&self) -> &[RateCategory] {
    &self.categories
  }

  pub fn n_categories(&self) -> usize {
    self.categories.len()
  }

  pub const fn root_policy(&self) -> RootPolicy {
    self.root_policy
  }

  pub const fn normalize_rate(&self) -> bool {
    self.normalize_rate
  }

  /// Model restricted to one of its categories (weight 1), preserving the
  /// root policy. Used to seed mixture-model reconstruction from the
  /// dominant category.
  pub fn restricted_to_category(&self, category: usize) -> Result<Self, Report> {
    let Some(category) = self.categories.get(category).cloned() else {
      return make_error!(
        "Model has {} rate categories; cannot restrict to category {category}",
        self.n_categories()
      );
    };
    Ok(Self::single(category)?.with_root_policy(self.root_policy))
  }

  /// Category mixture weights for one parameter assignment, normalized to
  /// sum 1
  pub(crate) fn resolve_weights(
    &self,
    params: &Parameters,
    memo: &mut HashMap<String, f64>,
  ) -> Result<Vec<f64>, Report> {
    let mut weights = Vec::with_capacity(self.weights.len());
    for (i, expr) in self.weights.iter().enumerate() {
      let value = match memo.get(&expr.to_string()) {
        Some(&value) => value,
        None => {
          let value = expr
            .eval(params)
            .wrap_err_with(|| format!("When evaluating weight of rate category {i}"))?;
          memo.insert(expr.to_string(), value);
          value
        }
      };
      if !(value.is_finite() && value >= 0.0) {
        return make_error!("Weight of rate category {i} must be finite and nonnegative, but evaluated to {value}");
      }
      weights.push(value);
    }

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
      return make_error!("Rate category weights sum to zero; cannot normalize");
    }
    Ok(weights.into_iter().map(|w| w / total).collect())
  }
}
