use crate::make_report;
use eyre::Report;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One concrete assignment of named model parameters and branch lengths
/// (keyed by child node name).
///
/// Values are set by an outer driver (e.g. an optimizer) and consumed when
/// building a [`crate::likelihood::prob_cache::ProbabilityCache`]; a
/// missing parameter is a structural error naming the parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
  values: IndexMap<String, f64>,
  branch_lengths: IndexMap<String, f64>,
}

impl Parameters {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
    self.values.insert(name.into(), value);
    self
  }

  #[must_use]
  pub fn with_branch_length(mut self, child_node: impl Into<String>, length: f64) -> Self {
    self.branch_lengths.insert(child_node.into(), length);
    self
  }

  pub fn set_value(&mut self, name: impl Into<String>, value: f64) {
    self.values.insert(name.into(), value);
  }

  pub fn set_branch_length(&mut self, child_node: impl Into<String>, length: f64) {
    self.branch_lengths.insert(child_node.into(), length);
  }

  pub fn value(&self, name: &str) -> Result<f64, Report> {
    self
      .values
      .get(name)
      .copied()
      .ok_or_else(|| make_report!("No value assigned to model parameter '{name}'"))
  }

  pub fn branch_length(&self, child_node: &str) -> Option<f64> {
    self.branch_lengths.get(child_node).copied()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  fn missing_parameter_is_an_error() {
    let params = Parameters::new().with_value("kappa", 2.0);
    assert_eq!(params.value("kappa").unwrap(), 2.0);
    assert!(params.value("omega").is_err());
  }
}
